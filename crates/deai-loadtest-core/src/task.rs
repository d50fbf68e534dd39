//! Task catalogue, payloads and the per-task records produced during a run.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::ids::{TaskId, VirtualUserId};

/// Closed set of task kinds the driver knows how to build payloads for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    TextGeneration,
    ImageClassification,
    SentimentAnalysis,
    LinearRegression,
    NeuralNetworkInference,
}

impl TaskKind {
    /// Every supported kind, in catalogue order.
    pub const ALL: [TaskKind; 5] = [
        Self::TextGeneration,
        Self::ImageClassification,
        Self::SentimentAnalysis,
        Self::LinearRegression,
        Self::NeuralNetworkInference,
    ];

    /// Wire name of the task type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TextGeneration => "text_generation",
            Self::ImageClassification => "image_classification",
            Self::SentimentAnalysis => "sentiment_analysis",
            Self::LinearRegression => "linear_regression",
            Self::NeuralNetworkInference => "neural_network_inference",
        }
    }

    /// Model requested for this kind.
    #[must_use]
    pub const fn model_name(&self) -> &'static str {
        match self {
            Self::TextGeneration => "gpt2-small",
            Self::ImageClassification => "resnet18",
            Self::SentimentAnalysis => "bert-base",
            Self::LinearRegression => "sklearn_linear",
            Self::NeuralNetworkInference => "pytorch_mlp",
        }
    }

    /// Input data for the `task_num`-th submission of `user`.
    #[must_use]
    pub fn input_for(&self, user: VirtualUserId, task_num: u64) -> String {
        let user = user.index();
        match self {
            Self::TextGeneration => {
                format!("User {user} task {task_num}: Generate text about AI")
            }
            Self::ImageClassification => format!("image_data_placeholder_{user}_{task_num}"),
            Self::SentimentAnalysis => {
                format!("This is test text for sentiment analysis from user {user}")
            }
            Self::LinearRegression => "[[1, 2, 3], [4, 5, 6], [7, 8, 9]]".to_string(),
            Self::NeuralNetworkInference => format!("input_vector_{user}_{task_num}"),
        }
    }

    /// Builds the submission payload for this kind.
    #[must_use]
    pub fn build_payload(
        &self,
        user: VirtualUserId,
        task_num: u64,
        max_cost: f64,
        priority: i32,
    ) -> TaskPayload {
        TaskPayload {
            task_type: *self,
            model_name: self.model_name().to_string(),
            input_data: self.input_for(user, task_num),
            max_cost: max_cost.to_string(),
            priority,
        }
    }
}

/// Body of one task submission request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub task_type: TaskKind,
    pub model_name: String,
    pub input_data: String,
    /// Cost ceiling, sent as a decimal string.
    pub max_cost: String,
    pub priority: i32,
}

/// Status reported by the remote status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    #[serde(alias = "Pending", alias = "submitted", alias = "Submitted", alias = "assigned", alias = "Assigned")]
    Pending,
    #[serde(alias = "Running", alias = "in_progress", alias = "InProgress")]
    Running,
    #[serde(alias = "Completed")]
    Completed,
    #[serde(
        alias = "Failed",
        alias = "cancelled",
        alias = "Cancelled",
        alias = "expired",
        alias = "Expired"
    )]
    Failed,
}

impl RemoteStatus {
    /// Returns true once no further transitions can happen.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// How a submission attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionResult {
    Accepted(TaskId),
    Rejected {
        kind: ErrorKind,
        reason: String,
    },
}

/// Record of one outbound submission, immutable once the gate returns.
#[derive(Debug, Clone)]
pub struct TaskSubmission {
    pub user: VirtualUserId,
    pub submitted_at: DateTime<Utc>,
    /// Monotonic instant the request was sent. Processing latency and the
    /// task timeout are both measured from here.
    pub sent_at: Instant,
    pub latency: Duration,
    pub result: SubmissionResult,
}

/// Terminal classification of a tracked task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    Completed,
    Failed,
    TimedOut,
}

/// Terminal record for one accepted submission.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    pub user: VirtualUserId,
    pub status: TerminalStatus,
    /// End-to-end latency; only set for completed tasks.
    pub processing_latency: Option<Duration>,
    pub assigned_node: Option<String>,
    pub error: Option<ErrorKind>,
}

impl TaskOutcome {
    #[must_use]
    pub fn completed(
        task_id: TaskId,
        user: VirtualUserId,
        latency: Duration,
        assigned_node: Option<String>,
    ) -> Self {
        Self {
            task_id,
            user,
            status: TerminalStatus::Completed,
            processing_latency: Some(latency),
            assigned_node,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(task_id: TaskId, user: VirtualUserId, assigned_node: Option<String>) -> Self {
        Self {
            task_id,
            user,
            status: TerminalStatus::Failed,
            processing_latency: None,
            assigned_node,
            error: Some(ErrorKind::TaskFailed),
        }
    }

    #[must_use]
    pub fn timed_out(task_id: TaskId, user: VirtualUserId) -> Self {
        Self {
            task_id,
            user,
            status: TerminalStatus::TimedOut,
            processing_latency: None,
            assigned_node: None,
            error: Some(ErrorKind::TimedOut),
        }
    }
}

/// One periodic reading of local resource usage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceSample {
    pub taken_at: DateTime<Utc>,
    pub cpu_pct: f64,
    pub memory_pct: f64,
    /// Bytes received plus transmitted since the previous sample.
    pub network_bytes_delta: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_follows_kind() {
        let payload = TaskKind::ImageClassification.build_payload(VirtualUserId::new(3), 7, 0.1, 5);
        assert_eq!(payload.model_name, "resnet18");
        assert_eq!(payload.input_data, "image_data_placeholder_3_7");
        assert_eq!(payload.max_cost, "0.1");
        assert_eq!(payload.priority, 5);
    }

    #[test]
    fn test_payload_wire_shape() {
        let payload = TaskKind::TextGeneration.build_payload(VirtualUserId::new(0), 1, 0.25, 2);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["task_type"], "text_generation");
        assert_eq!(json["model_name"], "gpt2-small");
        assert_eq!(json["max_cost"], "0.25");
    }

    #[test]
    fn test_remote_status_spellings() {
        let parse = |s: &str| serde_json::from_str::<RemoteStatus>(&format!("\"{s}\"")).unwrap();
        assert_eq!(parse("completed"), RemoteStatus::Completed);
        assert_eq!(parse("Completed"), RemoteStatus::Completed);
        assert_eq!(parse("InProgress"), RemoteStatus::Running);
        assert_eq!(parse("assigned"), RemoteStatus::Pending);
        assert_eq!(parse("Expired"), RemoteStatus::Failed);
        assert!(parse("failed").is_terminal());
        assert!(!parse("running").is_terminal());
    }

    #[test]
    fn test_outcome_constructors() {
        let id = TaskId::new("t-1");
        let user = VirtualUserId::new(0);
        let done = TaskOutcome::completed(id.clone(), user, Duration::from_secs(3), None);
        assert_eq!(done.processing_latency, Some(Duration::from_secs(3)));
        let late = TaskOutcome::timed_out(id, user);
        assert_eq!(late.status, TerminalStatus::TimedOut);
        assert!(late.processing_latency.is_none());
        assert_eq!(late.error, Some(ErrorKind::TimedOut));
    }
}
