//! Virtual user simulation
//!
//! Each virtual user owns one session and a private counter, and submits
//! tasks at its own cadence until it is cancelled, has made as many attempts
//! as its budget allows, or the test duration elapses. Accepted submissions
//! are handed to a `CompletionTracker` running on the run's shared
//! `TaskTracker`.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument};

use deai_loadtest_core::{
    LoadTestError, LoadTestResult, Session, SubmissionResult, TaskService, TestConfiguration,
    VirtualUserId,
};

use crate::aggregator::MetricsRecorder;
use crate::gate::SubmissionGate;
use crate::tracker::{CompletionTracker, TrackerTiming};

const PRIORITY_RANGE: std::ops::RangeInclusive<i32> = 1..=9;

/// Everything the users of one run share.
#[derive(Clone)]
pub struct SimulationContext {
    pub service: Arc<dyn TaskService>,
    pub config: Arc<TestConfiguration>,
    pub gate: SubmissionGate,
    pub recorder: MetricsRecorder,
    pub trackers: TaskTracker,
    /// Raised when users must stop issuing submissions.
    pub stop: CancellationToken,
    /// Raised at the hard end-of-test deadline; trackers give up on it.
    pub hard_stop: CancellationToken,
    /// Instant the load started; users never submit past `test_duration` from it.
    pub load_started: Instant,
}

impl std::fmt::Debug for SimulationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationContext")
            .field("gate", &self.gate)
            .field("load_started", &self.load_started)
            .finish_non_exhaustive()
    }
}

/// Why a user stopped submitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Cancelled,
    BudgetExhausted,
    DurationElapsed,
    Aborted,
}

/// Summary of one user's stream.
#[derive(Debug, Clone, Serialize)]
pub struct UserReport {
    pub user: VirtualUserId,
    pub budget: u64,
    pub attempted: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub stop_reason: StopReason,
}

/// One simulated submission stream.
pub struct VirtualUser {
    id: VirtualUserId,
    session: Arc<Session>,
    budget: u64,
    attempted: u64,
    accepted: u64,
    rng: StdRng,
}

impl VirtualUser {
    #[must_use]
    pub fn new(id: VirtualUserId, session: Session, budget: u64) -> Self {
        Self {
            id,
            session: Arc::new(session),
            budget,
            attempted: 0,
            accepted: 0,
            rng: StdRng::from_entropy(),
        }
    }

    /// Fixes the task-kind and priority choices, for reproducible runs.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    fn stop_reason(&self, ctx: &SimulationContext) -> Option<StopReason> {
        if ctx.stop.is_cancelled() {
            Some(StopReason::Cancelled)
        } else if self.attempted >= self.budget {
            Some(StopReason::BudgetExhausted)
        } else if ctx.load_started.elapsed() >= ctx.config.test_duration() {
            Some(StopReason::DurationElapsed)
        } else {
            None
        }
    }

    /// Runs the submission loop to completion.
    #[instrument(name = "virtual_user", skip_all, fields(user = %self.id, budget = self.budget))]
    pub async fn run(mut self, ctx: SimulationContext) -> UserReport {
        debug!("virtual user started");
        let timing = TrackerTiming {
            poll_interval: ctx.config.poll_interval(),
            task_timeout: ctx.config.task_timeout(),
        };

        let stop_reason = loop {
            if let Some(reason) = self.stop_reason(&ctx) {
                break reason;
            }

            if let Err(e) = self.submit_one(&ctx, timing).await {
                error!(error = %e, "virtual user cannot submit");
                break StopReason::Aborted;
            }

            if !self.think(&ctx.stop, ctx.config.think_time()).await {
                break StopReason::Cancelled;
            }
        };

        let report = UserReport {
            user: self.id,
            budget: self.budget,
            attempted: self.attempted,
            accepted: self.accepted,
            rejected: self.attempted - self.accepted,
            stop_reason,
        };
        info!(
            attempted = report.attempted,
            accepted = report.accepted,
            reason = ?report.stop_reason,
            "virtual user finished"
        );
        report
    }

    async fn submit_one(
        &mut self,
        ctx: &SimulationContext,
        timing: TrackerTiming,
    ) -> LoadTestResult<()> {
        let Some(kind) = ctx.config.task_types.choose(&mut self.rng).copied() else {
            return Err(LoadTestError::invalid_config("load.task_types must not be empty"));
        };
        let priority = self.rng.gen_range(PRIORITY_RANGE);
        self.attempted += 1;
        let payload =
            kind.build_payload(self.id, self.attempted, ctx.config.max_cost_per_task, priority);

        let submission = ctx
            .gate
            .submit(ctx.service.as_ref(), &self.session, self.id, &payload)
            .await?;
        let tracked = ctx.recorder.record_submission(&submission);

        match submission.result {
            SubmissionResult::Accepted(task_id) if tracked => {
                self.accepted += 1;
                debug!(task_id = %task_id, kind = kind.as_str(), "task accepted");
                let tracker = CompletionTracker::new(
                    Arc::clone(&ctx.service),
                    Arc::clone(&self.session),
                    task_id,
                    self.id,
                    Instant::from_std(submission.sent_at),
                    timing,
                    ctx.recorder.clone(),
                    ctx.hard_stop.clone(),
                );
                ctx.trackers.spawn(tracker.run());
            }
            SubmissionResult::Accepted(task_id) => {
                debug!(task_id = %task_id, "task id already in flight, not tracked");
            }
            SubmissionResult::Rejected { kind, reason } => {
                debug!(kind = %kind, reason = %reason, "task rejected");
            }
        }
        Ok(())
    }

    /// Sleeps for the think time. Returns false when cancelled meanwhile.
    async fn think(&self, stop: &CancellationToken, think_time: Duration) -> bool {
        if think_time.is_zero() {
            tokio::task::yield_now().await;
            return !stop.is_cancelled();
        }
        tokio::select! {
            _ = stop.cancelled() => false,
            _ = sleep(think_time) => true,
        }
    }
}

impl std::fmt::Debug for VirtualUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualUser")
            .field("id", &self.id)
            .field("session", &self.session)
            .field("budget", &self.budget)
            .field("attempted", &self.attempted)
            .field("accepted", &self.accepted)
            .finish_non_exhaustive()
    }
}
