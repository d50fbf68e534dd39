//! Per-task completion tracking
//!
//! A `CompletionTracker` supervises one accepted task:
//!
//! ```text
//! Submitted ──poll──▶ Polling ──poll──▶ Completed | Failed
//!                        │
//!                        └── task_timeout elapsed or hard stop ──▶ TimedOut
//! ```
//!
//! The tracker writes exactly one `TaskOutcome` when it reaches a terminal
//! state. Poll errors never fail the task; the next tick retries until the
//! task timeout runs out.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep_until, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use deai_loadtest_core::{
    RemoteStatus, Session, TaskId, TaskOutcome, TaskService, TerminalStatus, VirtualUserId,
};

use crate::aggregator::MetricsRecorder;

/// Lifecycle phase of a tracked task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerPhase {
    Submitted,
    Polling,
    Terminal(TerminalStatus),
}

/// Timing knobs shared by every tracker of a run.
#[derive(Debug, Clone, Copy)]
pub struct TrackerTiming {
    pub poll_interval: Duration,
    pub task_timeout: Duration,
}

/// Supervisor of one accepted task.
pub struct CompletionTracker {
    service: Arc<dyn TaskService>,
    session: Arc<Session>,
    task_id: TaskId,
    user: VirtualUserId,
    submitted_at: Instant,
    timing: TrackerTiming,
    recorder: MetricsRecorder,
    hard_stop: CancellationToken,
    phase: TrackerPhase,
    polls: u32,
}

impl CompletionTracker {
    /// Creates a tracker for a task whose submission request went out at
    /// `submitted_at`. Processing latency and the task timeout count from it.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        service: Arc<dyn TaskService>,
        session: Arc<Session>,
        task_id: TaskId,
        user: VirtualUserId,
        submitted_at: Instant,
        timing: TrackerTiming,
        recorder: MetricsRecorder,
        hard_stop: CancellationToken,
    ) -> Self {
        Self {
            service,
            session,
            task_id,
            user,
            submitted_at,
            timing,
            recorder,
            hard_stop,
            phase: TrackerPhase::Submitted,
            polls: 0,
        }
    }

    #[must_use]
    pub fn phase(&self) -> TrackerPhase {
        self.phase
    }

    /// Polls until a terminal state and records the outcome.
    #[instrument(name = "tracker", skip(self), fields(task_id = %self.task_id, user = %self.user))]
    pub async fn run(mut self) -> TerminalStatus {
        let deadline = self.submitted_at + self.timing.task_timeout;

        let outcome = loop {
            if self.hard_stop.is_cancelled() {
                debug!(polls = self.polls, "hard stop reached");
                break TaskOutcome::timed_out(self.task_id.clone(), self.user);
            }
            if Instant::now() >= deadline {
                debug!(polls = self.polls, "task timeout elapsed");
                break TaskOutcome::timed_out(self.task_id.clone(), self.user);
            }

            if let Some(outcome) = self.poll_once(deadline).await {
                break outcome;
            }

            let next_tick = (Instant::now() + self.timing.poll_interval).min(deadline);
            tokio::select! {
                _ = self.hard_stop.cancelled() => {}
                _ = sleep_until(next_tick) => {}
            }
        };

        let status = outcome.status;
        self.phase = TrackerPhase::Terminal(status);
        if !self.recorder.record_outcome(outcome) {
            warn!(status = ?status, "outcome was already recorded");
        }
        status
    }

    /// One status call. Returns the outcome once the task is terminal.
    async fn poll_once(&mut self, deadline: Instant) -> Option<TaskOutcome> {
        self.phase = TrackerPhase::Polling;
        self.polls += 1;

        let call = self.service.status(&self.session, &self.task_id);
        let response = tokio::select! {
            _ = self.hard_stop.cancelled() => return None,
            response = timeout_at(deadline, call) => response,
        };

        let report = match response {
            Err(_elapsed) => return None,
            Ok(Err(e)) => {
                if e.is_transport() {
                    debug!(error = %e, "status poll failed, retrying next tick");
                } else {
                    warn!(error = %e, "status poll rejected, retrying next tick");
                }
                self.recorder.record_error(e.classification());
                return None;
            }
            Ok(Ok(report)) => report,
        };

        trace!(status = ?report.status, "status poll");
        match report.status {
            RemoteStatus::Completed => Some(TaskOutcome::completed(
                self.task_id.clone(),
                self.user,
                self.submitted_at.elapsed(),
                report.assigned_node,
            )),
            RemoteStatus::Failed => Some(TaskOutcome::failed(
                self.task_id.clone(),
                self.user,
                report.assigned_node,
            )),
            RemoteStatus::Pending | RemoteStatus::Running => None,
        }
    }
}

impl std::fmt::Debug for CompletionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionTracker")
            .field("task_id", &self.task_id)
            .field("user", &self.user)
            .field("phase", &self.phase)
            .field("polls", &self.polls)
            .finish_non_exhaustive()
    }
}
