//! Load shape and run orchestration
//!
//! [`LoadShape`] is the pure timeline: when each virtual user starts and how
//! many are active at a given offset. [`LoadController`] drives one run along
//! that timeline:
//!
//! 1. Setup: provision virtual users concurrently, check node availability.
//! 2. Start the resource sampler and the health probe.
//! 3. Ramp-up: start users on a linear staircase over `ramp_up`.
//! 4. Sustained: hold every user until `ramp_up + sustained` has elapsed or
//!    every budget is spent.
//! 5. Ramp-down: stop submissions and give in-flight trackers up to
//!    `ramp_down` to settle, then hard-stop the rest as timed out.
//! 6. Freeze the metrics and judge them against the targets.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::{interval_at, sleep, sleep_until, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use deai_loadtest_core::{
    ErrorKind, LoadTestError, LoadTestResult, LoadTestSettings, RunId, Session, TaskService,
    TestConfiguration, UserCredentials, VirtualUserId,
};

use crate::aggregator::{MetricsAggregator, MetricsSnapshot};
use crate::gate::SubmissionGate;
use crate::health::HealthProbe;
use crate::live::LiveMetrics;
use crate::sampler::{ResourceProbe, ResourceSampler, SystemProbe};
use crate::stats::AggregateStats;
use crate::user::{SimulationContext, UserReport, VirtualUser};
use crate::verdict::{VerdictEvaluator, VerdictReport};

/// Time hard-stopped trackers get to record their timeout.
const HARD_STOP_GRACE: Duration = Duration::from_secs(5);

/// Phase of the load timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPhase {
    RampUp,
    Sustained,
    RampDown,
    Finished,
}

/// Timeline of a run with a fixed number of users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadShape {
    users: u32,
    ramp_up: Duration,
    test_duration: Duration,
    ramp_down: Duration,
}

impl LoadShape {
    #[must_use]
    pub fn new(users: u32, config: &TestConfiguration) -> Self {
        Self {
            users,
            ramp_up: config.ramp_up(),
            test_duration: config.test_duration(),
            ramp_down: config.ramp_down(),
        }
    }

    /// Offset from load start at which user `index` begins submitting.
    ///
    /// Users start at `index * ramp_up / users`, so user 0 starts at once and
    /// the last one starts one step before the end of ramp-up.
    #[must_use]
    pub fn start_offset(&self, index: u32) -> Duration {
        if self.users == 0 {
            return Duration::ZERO;
        }
        let steps = u128::from(index.min(self.users));
        let nanos = self.ramp_up.as_nanos() * steps / u128::from(self.users);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Users submitting at `elapsed` from load start.
    #[must_use]
    pub fn active_users_at(&self, elapsed: Duration) -> u32 {
        if elapsed >= self.test_duration {
            return 0;
        }
        let started = (0..self.users)
            .filter(|&i| self.start_offset(i) <= elapsed)
            .count();
        u32::try_from(started).unwrap_or(self.users)
    }

    #[must_use]
    pub fn phase_at(&self, elapsed: Duration) -> LoadPhase {
        if elapsed < self.ramp_up {
            LoadPhase::RampUp
        } else if elapsed < self.test_duration {
            LoadPhase::Sustained
        } else if elapsed < self.test_duration + self.ramp_down {
            LoadPhase::RampDown
        } else {
            LoadPhase::Finished
        }
    }
}

/// Everything a finished run hands to a report emitter.
#[derive(Debug, Clone, Serialize)]
pub struct LoadTestReport {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stats: AggregateStats,
    pub verdict: VerdictReport,
    pub users: Vec<UserReport>,
    /// Frozen copy of the raw metrics.
    #[serde(skip_serializing)]
    pub snapshot: MetricsSnapshot,
    #[serde(skip_serializing)]
    pub live: LiveMetrics,
}

impl LoadTestReport {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.verdict.passed
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Drives one load test run.
pub struct LoadController {
    service: Arc<dyn TaskService>,
    settings: LoadTestSettings,
    probe: Option<Box<dyn ResourceProbe>>,
    seed: Option<u64>,
    cancel: CancellationToken,
}

impl LoadController {
    /// Validates `settings` and prepares a run against `service`.
    pub fn new(service: Arc<dyn TaskService>, settings: LoadTestSettings) -> LoadTestResult<Self> {
        settings.validate()?;
        Ok(Self {
            service,
            settings,
            probe: None,
            seed: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Replaces the host resource probe.
    #[must_use]
    pub fn with_probe(mut self, probe: impl ResourceProbe) -> Self {
        self.probe = Some(Box::new(probe));
        self
    }

    /// Seeds every user's task-kind and priority choices.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Stop signal for the run. Cancelling it ends submissions at each user's
    /// next cycle boundary and moves the run into ramp-down.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs the test to completion.
    ///
    /// Fails only when no virtual user could be provisioned; every other
    /// error is counted in the metrics.
    pub async fn run(mut self) -> LoadTestResult<LoadTestReport> {
        let run_id = RunId::new();
        let config = Arc::new(self.settings.load.clone());
        let sampling = self.settings.sampling.clone();
        info!(
            run_id = %run_id,
            users = config.concurrent_users,
            total_tasks = config.total_tasks,
            ramp_up = ?config.ramp_up(),
            sustained = ?config.sustained(),
            ramp_down = ?config.ramp_down(),
            "starting load test"
        );

        let aggregator = MetricsAggregator::new()?;
        let recorder = aggregator.recorder();

        // Setup
        let sessions = self.provision_users(&aggregator).await;
        let requested = config.concurrent_users;
        let started_users = u32::try_from(sessions.len()).unwrap_or(u32::MAX);
        aggregator.set_user_counts(requested, started_users);
        if sessions.is_empty() {
            error!(requested, "no virtual user could be provisioned");
            return Err(LoadTestError::NoVirtualUsers { requested });
        }
        if started_users < requested {
            warn!(requested, started = started_users, "continuing with fewer virtual users");
        }
        self.check_nodes(&aggregator, config.target_nodes).await;

        // Background probes run for the whole timeline, ramp-down included
        let background = CancellationToken::new();
        let probe = self
            .probe
            .take()
            .unwrap_or_else(|| Box::new(SystemProbe::new()));
        let sampler = ResourceSampler::spawn(
            probe,
            sampling.resource_interval(),
            recorder.clone(),
            background.child_token(),
        );
        let health = HealthProbe::spawn(
            Arc::clone(&self.service),
            sampling.health_interval(),
            recorder.clone(),
            background.child_token(),
        );

        let started_at = Utc::now();
        aggregator.mark_started();
        let load_started = Instant::now();
        let shape = LoadShape::new(started_users, &config);

        let ctx = SimulationContext {
            service: Arc::clone(&self.service),
            config: Arc::clone(&config),
            gate: SubmissionGate::new(config.submission_concurrency)?,
            recorder: recorder.clone(),
            trackers: TaskTracker::new(),
            stop: self.cancel.child_token(),
            hard_stop: CancellationToken::new(),
            load_started,
        };

        // Ramp-up and sustained
        let mut users = JoinSet::new();
        for (position, session) in sessions.into_iter().enumerate() {
            let index = u32::try_from(position).unwrap_or(u32::MAX);
            let mut user = VirtualUser::new(
                VirtualUserId::new(index),
                session,
                config.user_budget(index, started_users),
            );
            if let Some(seed) = self.seed {
                user = user.with_seed(seed.wrapping_add(u64::from(index)));
            }
            let offset = shape.start_offset(index);
            let ctx = ctx.clone();
            users.spawn(async move {
                tokio::select! {
                    _ = ctx.stop.cancelled() => {}
                    _ = sleep(offset) => {}
                }
                user.run(ctx).await
            });
        }

        let reports = Self::supervise_users(
            &mut users,
            &ctx,
            &aggregator,
            &shape,
            sampling.progress_interval(),
        )
        .await;

        // Ramp-down
        ctx.stop.cancel();
        ctx.trackers.close();
        info!(
            in_flight = aggregator.pending_count(),
            grace = ?config.ramp_down(),
            "ramping down"
        );
        if timeout(config.ramp_down(), ctx.trackers.wait()).await.is_err() {
            warn!(
                in_flight = aggregator.pending_count(),
                "ramp-down grace elapsed, stopping remaining trackers"
            );
            ctx.hard_stop.cancel();
            if timeout(HARD_STOP_GRACE, ctx.trackers.wait()).await.is_err() {
                warn!("trackers did not stop in time");
            }
        }
        let forced = aggregator.force_timeout_pending();
        if forced > 0 {
            warn!(forced, "force-finalised unreported tasks as timed out");
        }

        aggregator.mark_finished();
        let finished_at = Utc::now();
        background.cancel();
        let samples = sampler.stop().await;
        let probes = health.stop().await;

        let snapshot = aggregator.snapshot();
        let stats = aggregator.compute();
        let verdict = VerdictEvaluator::evaluate(&stats, &self.settings.targets);

        info!(
            run_id = %run_id,
            wall_clock_secs = stats.wall_clock_secs,
            submitted = stats.tasks_submitted,
            completed = stats.tasks_completed,
            failed = stats.tasks_failed,
            timed_out = stats.tasks_timed_out,
            submissions_per_second = stats.submissions_per_second,
            resource_samples = samples,
            health_probes = probes,
            passed = verdict.passed,
            "load test complete"
        );
        for failure in verdict.failures() {
            warn!(
                target_name = failure.name,
                observed = ?failure.observed,
                threshold = failure.threshold,
                "performance target missed"
            );
        }

        Ok(LoadTestReport {
            run_id,
            started_at,
            finished_at,
            stats,
            verdict,
            users: reports,
            snapshot,
            live: aggregator.live().clone(),
        })
    }

    /// Registers every requested user concurrently. Failures are counted and
    /// skipped.
    async fn provision_users(&self, aggregator: &MetricsAggregator) -> Vec<Session> {
        let requested = self.settings.load.concurrent_users;
        let recorder = aggregator.recorder();
        let mut registrations = JoinSet::new();
        for index in 0..requested {
            let service = Arc::clone(&self.service);
            let credentials =
                UserCredentials::generated(index, self.settings.api.user_password.clone());
            registrations.spawn(async move {
                let result = service.register_user(&credentials).await;
                (index, credentials.username, result)
            });
        }

        let mut sessions = Vec::with_capacity(requested as usize);
        while let Some(joined) = registrations.join_next().await {
            match joined {
                Ok((index, _, Ok(session))) => sessions.push((index, session)),
                Ok((index, username, Err(e))) => {
                    warn!(index, username = %username, error = %e, "virtual user setup failed");
                    recorder.record_error(ErrorKind::Setup);
                }
                Err(e) => {
                    error!(error = %e, "registration task failed");
                    recorder.record_error(ErrorKind::Setup);
                }
            }
        }
        sessions.sort_by_key(|(index, _)| *index);
        info!(requested, ready = sessions.len(), "virtual users provisioned");
        sessions.into_iter().map(|(_, session)| session).collect()
    }

    async fn check_nodes(&self, aggregator: &MetricsAggregator, target_nodes: u32) {
        match self.service.active_nodes().await {
            Ok(active) => {
                aggregator.set_active_nodes(active);
                if active < target_nodes as usize {
                    warn!(active, target_nodes, "fewer active nodes than targeted");
                } else {
                    info!(active, target_nodes, "node availability ok");
                }
            }
            Err(e) => warn!(error = %e, "node availability check failed"),
        }
    }

    /// Waits for every user to finish, stopping them at the end of the
    /// sustained phase, and logs progress meanwhile.
    async fn supervise_users(
        users: &mut JoinSet<UserReport>,
        ctx: &SimulationContext,
        aggregator: &MetricsAggregator,
        shape: &LoadShape,
        progress_every: Duration,
    ) -> Vec<UserReport> {
        let load_deadline = ctx.load_started + ctx.config.test_duration();
        let mut progress = interval_at(ctx.load_started + progress_every, progress_every);
        progress.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut reports = Vec::with_capacity(users.len());

        loop {
            tokio::select! {
                joined = users.join_next() => match joined {
                    None => break,
                    Some(Ok(report)) => reports.push(report),
                    Some(Err(e)) => error!(error = %e, "virtual user task failed"),
                },
                _ = progress.tick() => {
                    let elapsed = ctx.load_started.elapsed();
                    let snapshot = aggregator.snapshot();
                    info!(
                        elapsed_secs = elapsed.as_secs(),
                        phase = ?shape.phase_at(elapsed),
                        active_users = shape.active_users_at(elapsed),
                        running_users = users.len(),
                        submitted = snapshot.tasks_submitted,
                        rejected = snapshot.tasks_rejected,
                        completed = snapshot.tasks_completed,
                        failed = snapshot.tasks_failed,
                        timed_out = snapshot.tasks_timed_out,
                        in_flight = aggregator.pending_count(),
                        "progress"
                    );
                }
                _ = sleep_until(load_deadline), if !ctx.stop.is_cancelled() => {
                    info!("test duration elapsed, stopping virtual users");
                    ctx.stop.cancel();
                }
            }
        }

        reports.sort_by_key(|r| r.user);
        reports
    }
}

impl std::fmt::Debug for LoadController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadController")
            .field("settings", &self.settings)
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(users: u32, ramp_up: f64, sustained: f64) -> LoadShape {
        let config = TestConfiguration {
            concurrent_users: users,
            ramp_up_secs: ramp_up,
            sustained_secs: sustained,
            ramp_down_secs: 30.0,
            ..TestConfiguration::default()
        };
        LoadShape::new(users, &config)
    }

    #[test]
    fn test_staircase_offsets() {
        let shape = shape(4, 10.0, 20.0);
        let offsets: Vec<_> = (0..4).map(|i| shape.start_offset(i).as_secs_f64()).collect();
        assert_eq!(offsets, vec![0.0, 2.5, 5.0, 7.5]);
    }

    #[test]
    fn test_active_users_rise_hold_and_fall() {
        let shape = shape(4, 10.0, 20.0);
        assert_eq!(shape.active_users_at(Duration::ZERO), 1);
        assert_eq!(shape.active_users_at(Duration::from_secs(3)), 2);
        assert_eq!(shape.active_users_at(Duration::from_secs(8)), 4);
        assert_eq!(shape.active_users_at(Duration::from_secs(29)), 4);
        assert_eq!(shape.active_users_at(Duration::from_secs(30)), 0);

        let mut previous = 0;
        for s in 0..30 {
            let now = shape.active_users_at(Duration::from_secs(s));
            assert!(now >= previous);
            previous = now;
        }
    }

    #[test]
    fn test_zero_ramp_up_starts_everyone() {
        let shape = shape(5, 0.0, 10.0);
        assert_eq!(shape.active_users_at(Duration::ZERO), 5);
        assert_eq!(shape.phase_at(Duration::ZERO), LoadPhase::Sustained);
    }

    #[test]
    fn test_phases() {
        let shape = shape(2, 10.0, 20.0);
        assert_eq!(shape.phase_at(Duration::from_secs(5)), LoadPhase::RampUp);
        assert_eq!(shape.phase_at(Duration::from_secs(10)), LoadPhase::Sustained);
        assert_eq!(shape.phase_at(Duration::from_secs(45)), LoadPhase::RampDown);
        assert_eq!(shape.phase_at(Duration::from_secs(60)), LoadPhase::Finished);
    }
}
