//! Metrics aggregation for a load test run
//!
//! `MetricsAggregator` is the only owner of the [`MetricsSnapshot`]. Workers get a
//! [`MetricsRecorder`], a cloneable handle that can append entries but never
//! read or mutate the snapshot directly. Every append takes a short,
//! non-async lock; no lock is ever held across an `.await`.
//!
//! The aggregator also keeps the set of accepted tasks that have not yet
//! reported a terminal outcome. An outcome for a task outside that set is
//! dropped, so each accepted submission is counted exactly once.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use deai_loadtest_core::{
    ErrorKind, LoadTestError, LoadTestResult, ResourceSample, SubmissionResult, TaskId,
    TaskOutcome, TaskSubmission, TerminalStatus, VirtualUserId,
};

use crate::live::LiveMetrics;
use crate::stats::{rate_per_second, ratio_pct, AggregateStats, LatencySummary, ResourceSummary};

/// Everything recorded during a run.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    /// Submission round trips, in recording order.
    pub submission_latencies: Vec<Duration>,
    /// Submission-to-completion latencies of completed tasks, in recording order.
    pub processing_latencies: Vec<Duration>,
    /// Health probe round trips.
    pub api_response_times: Vec<Duration>,

    pub tasks_attempted: u64,
    pub tasks_submitted: u64,
    pub tasks_rejected: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_timed_out: u64,
    pub forced_timeouts: u64,

    pub error_counts: BTreeMap<ErrorKind, u64>,
    pub node_distribution: BTreeMap<String, u64>,
    pub per_user_submitted: BTreeMap<VirtualUserId, u64>,

    pub resource_samples: Vec<ResourceSample>,

    pub health_checks_total: u64,
    pub health_checks_ok: u64,

    pub users_requested: u32,
    pub users_started: u32,
    pub active_nodes: Option<usize>,

    /// Observed duration between `mark_started` and `mark_finished`
    /// (or the moment the snapshot was taken, while still running).
    pub wall_clock: Duration,
}

impl MetricsSnapshot {
    /// Outcomes recorded so far, of every terminal kind.
    #[must_use]
    pub fn outcomes_recorded(&self) -> u64 {
        self.tasks_completed + self.tasks_failed + self.tasks_timed_out
    }

    fn bump_error(&mut self, kind: ErrorKind) {
        *self.error_counts.entry(kind).or_insert(0) += 1;
    }
}

#[derive(Debug, Default)]
struct State {
    snapshot: MetricsSnapshot,
    pending: HashMap<TaskId, VirtualUserId>,
    started: Option<Instant>,
    finished: Option<Instant>,
}

impl State {
    fn wall_clock(&self) -> Duration {
        match (self.started, self.finished) {
            (Some(start), Some(end)) => end.saturating_duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        }
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    live: LiveMetrics,
}

/// Single owner of the run's metrics.
#[derive(Debug)]
pub struct MetricsAggregator {
    shared: Arc<Shared>,
}

impl MetricsAggregator {
    pub fn new() -> LoadTestResult<Self> {
        let live = LiveMetrics::new()
            .map_err(|e| LoadTestError::internal(format!("live metrics setup failed: {e}")))?;
        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                live,
            }),
        })
    }

    /// Append-only handle for workers.
    #[must_use]
    pub fn recorder(&self) -> MetricsRecorder {
        MetricsRecorder {
            shared: Arc::clone(&self.shared),
        }
    }

    #[must_use]
    pub fn live(&self) -> &LiveMetrics {
        &self.shared.live
    }

    /// Starts the wall clock used for throughput.
    pub fn mark_started(&self) {
        let mut state = self.shared.state.lock();
        state.started = Some(Instant::now());
        state.finished = None;
    }

    /// Stops the wall clock.
    pub fn mark_finished(&self) {
        let mut state = self.shared.state.lock();
        if state.started.is_some() {
            state.finished = Some(Instant::now());
        }
    }

    pub fn set_user_counts(&self, requested: u32, started: u32) {
        let mut state = self.shared.state.lock();
        state.snapshot.users_requested = requested;
        state.snapshot.users_started = started;
    }

    pub fn set_active_nodes(&self, active: usize) {
        self.shared.state.lock().snapshot.active_nodes = Some(active);
    }

    /// Accepted tasks still waiting for an outcome.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    /// Records a `timed_out` outcome for every accepted task that has not
    /// reported yet. Returns how many were finalised.
    pub fn force_timeout_pending(&self) -> usize {
        let mut state = self.shared.state.lock();
        let pending: Vec<(TaskId, VirtualUserId)> = state.pending.drain().collect();
        let count = pending.len();
        for (task_id, user) in pending {
            debug!(task_id = %task_id, user = %user, "force-finalising task as timed out");
            state.snapshot.tasks_timed_out += 1;
            state.snapshot.forced_timeouts += 1;
            state.snapshot.bump_error(ErrorKind::TimedOut);
            self.shared.live.outcomes.with_label_values(&["timed_out"]).inc();
            self.shared
                .live
                .errors
                .with_label_values(&[&ErrorKind::TimedOut.to_string()])
                .inc();
        }
        self.shared.live.in_flight.set(0);
        count
    }

    /// Consistent copy of everything recorded so far.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.shared.state.lock();
        let mut snapshot = state.snapshot.clone();
        snapshot.wall_clock = state.wall_clock();
        snapshot
    }

    /// Derives final statistics from a consistent snapshot.
    #[must_use]
    pub fn compute(&self) -> AggregateStats {
        compute_stats(&self.snapshot())
    }
}

/// Derives statistics from a frozen snapshot. Pure and deterministic.
#[must_use]
pub fn compute_stats(snapshot: &MetricsSnapshot) -> AggregateStats {
    let errors = snapshot.tasks_rejected + snapshot.tasks_failed + snapshot.tasks_timed_out;

    AggregateStats {
        wall_clock_secs: snapshot.wall_clock.as_secs_f64(),
        users_requested: snapshot.users_requested,
        users_started: snapshot.users_started,
        active_nodes: snapshot.active_nodes,
        tasks_attempted: snapshot.tasks_attempted,
        tasks_submitted: snapshot.tasks_submitted,
        tasks_rejected: snapshot.tasks_rejected,
        tasks_completed: snapshot.tasks_completed,
        tasks_failed: snapshot.tasks_failed,
        tasks_timed_out: snapshot.tasks_timed_out,
        outcomes_recorded: snapshot.outcomes_recorded(),
        forced_timeouts: snapshot.forced_timeouts,
        submissions_per_second: rate_per_second(snapshot.tasks_submitted, snapshot.wall_clock),
        completions_per_second: rate_per_second(snapshot.tasks_completed, snapshot.wall_clock),
        error_rate_pct: ratio_pct(errors, snapshot.tasks_submitted),
        success_rate_pct: ratio_pct(snapshot.tasks_completed, snapshot.tasks_submitted),
        submission_latency: LatencySummary::from_samples(&snapshot.submission_latencies),
        processing_latency: LatencySummary::from_samples(&snapshot.processing_latencies),
        api_response_time: LatencySummary::from_samples(&snapshot.api_response_times),
        health_checks_total: snapshot.health_checks_total,
        health_checks_ok: snapshot.health_checks_ok,
        uptime_pct: ratio_pct(snapshot.health_checks_ok, snapshot.health_checks_total),
        resource_samples: snapshot.resource_samples.len(),
        cpu: ResourceSummary::cpu(&snapshot.resource_samples),
        memory: ResourceSummary::memory(&snapshot.resource_samples),
        network_bytes_total: snapshot
            .resource_samples
            .iter()
            .map(|s| s.network_bytes_delta)
            .sum(),
        error_counts: snapshot.error_counts.clone(),
        node_distribution: snapshot.node_distribution.clone(),
        per_user_submitted: snapshot.per_user_submitted.clone(),
    }
}

/// Append-only handle onto the aggregator.
#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    shared: Arc<Shared>,
}

impl MetricsRecorder {
    /// Records one submission attempt.
    ///
    /// Accepted submissions become pending until their outcome is recorded;
    /// returns true when the caller must track the task to an outcome. A task
    /// id that is already pending is counted as a rejection instead.
    /// Transport failures carry no server round trip and add no latency sample.
    pub fn record_submission(&self, submission: &TaskSubmission) -> bool {
        let live = &self.shared.live;
        let mut state = self.shared.state.lock();
        state.snapshot.tasks_attempted += 1;

        match &submission.result {
            SubmissionResult::Accepted(task_id) if state.pending.contains_key(task_id) => {
                warn!(task_id = %task_id, "service returned a task id that is already tracked");
                let kind = ErrorKind::DuplicateTaskId;
                state.snapshot.tasks_rejected += 1;
                state.snapshot.submission_latencies.push(submission.latency);
                state.snapshot.bump_error(kind);
                live.submissions.with_label_values(&["rejected"]).inc();
                live.submission_latency.observe(submission.latency.as_secs_f64());
                live.errors.with_label_values(&[&kind.to_string()]).inc();
                false
            }
            SubmissionResult::Accepted(task_id) => {
                state.snapshot.tasks_submitted += 1;
                state.snapshot.submission_latencies.push(submission.latency);
                *state
                    .snapshot
                    .per_user_submitted
                    .entry(submission.user)
                    .or_insert(0) += 1;
                state.pending.insert(task_id.clone(), submission.user);
                live.submissions.with_label_values(&["accepted"]).inc();
                live.submission_latency.observe(submission.latency.as_secs_f64());
                live.in_flight.set(state.pending.len() as i64);
                true
            }
            SubmissionResult::Rejected { kind, .. } => {
                state.snapshot.tasks_rejected += 1;
                if !matches!(kind, ErrorKind::Transport(_)) {
                    state.snapshot.submission_latencies.push(submission.latency);
                    live.submission_latency.observe(submission.latency.as_secs_f64());
                }
                state.snapshot.bump_error(*kind);
                live.submissions.with_label_values(&["rejected"]).inc();
                live.errors.with_label_values(&[&kind.to_string()]).inc();
                false
            }
        }
    }

    /// Records the terminal outcome of an accepted task.
    ///
    /// Returns `false`, recording nothing, when the task is not pending: it
    /// was never accepted or already has an outcome.
    pub fn record_outcome(&self, outcome: TaskOutcome) -> bool {
        let live = &self.shared.live;
        let mut state = self.shared.state.lock();

        if state.pending.remove(&outcome.task_id).is_none() {
            warn!(
                task_id = %outcome.task_id,
                status = ?outcome.status,
                "ignoring outcome for a task that is not pending"
            );
            return false;
        }

        let label = match outcome.status {
            TerminalStatus::Completed => {
                state.snapshot.tasks_completed += 1;
                if let Some(latency) = outcome.processing_latency {
                    state.snapshot.processing_latencies.push(latency);
                    live.processing_latency.observe(latency.as_secs_f64());
                }
                if let Some(node) = outcome.assigned_node {
                    *state.snapshot.node_distribution.entry(node).or_insert(0) += 1;
                }
                "completed"
            }
            TerminalStatus::Failed => {
                state.snapshot.tasks_failed += 1;
                "failed"
            }
            TerminalStatus::TimedOut => {
                state.snapshot.tasks_timed_out += 1;
                "timed_out"
            }
        };
        if let Some(kind) = outcome.error {
            state.snapshot.bump_error(kind);
            live.errors.with_label_values(&[&kind.to_string()]).inc();
        }
        live.outcomes.with_label_values(&[label]).inc();
        live.in_flight.set(state.pending.len() as i64);
        true
    }

    /// Counts an error that is not tied to a submission or an outcome.
    pub fn record_error(&self, kind: ErrorKind) {
        self.shared.state.lock().snapshot.bump_error(kind);
        self.shared
            .live
            .errors
            .with_label_values(&[&kind.to_string()])
            .inc();
    }

    pub fn record_resource_sample(&self, sample: ResourceSample) {
        self.shared.state.lock().snapshot.resource_samples.push(sample);
    }

    /// Records one health probe: its round trip, and its failure class if any.
    ///
    /// Failures count under `health_check`; the live `health_checks` series
    /// keeps the underlying classification as its `result` label.
    pub fn record_health_check(&self, latency: Duration, failure: Option<ErrorKind>) {
        let live = &self.shared.live;
        let mut state = self.shared.state.lock();
        state.snapshot.health_checks_total += 1;
        match failure {
            None => {
                state.snapshot.health_checks_ok += 1;
                state.snapshot.api_response_times.push(latency);
                live.health_checks.with_label_values(&["ok"]).inc();
                live.health_latency.observe(latency.as_secs_f64());
            }
            Some(kind) => {
                state.snapshot.bump_error(ErrorKind::HealthCheck);
                live.errors
                    .with_label_values(&[&ErrorKind::HealthCheck.to_string()])
                    .inc();
                live.health_checks.with_label_values(&[&kind.to_string()]).inc();
                debug!(kind = %kind, "health probe failed");
            }
        }
    }
}
