//! In-memory task service for engine integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::time::Instant;

use deai_loadtest_core::{
    LoadTestSettings, PerformanceTargets, RemoteStatus, ResourceSample, ServiceError,
    ServiceResult, Session, StatusReport, TaskId, TaskPayload, TaskService, TestConfiguration,
    TransportErrorKind, UserCredentials,
};
use deai_loadtest_engine::ResourceProbe;

#[derive(Default)]
struct MockState {
    next_task: u64,
    tasks: HashMap<TaskId, (Instant, u64)>,
    registrations: u32,
    submit_calls: u64,
    status_calls: u64,
}

/// Scriptable stand-in for the remote service.
///
/// Tasks become terminal `processing_time` after submission; every
/// `fail_every`-th accepted task fails, every `reject_every`-th submission is
/// answered with HTTP 503.
pub struct MockTaskService {
    submit_latency: Duration,
    processing_time: Duration,
    fail_every: Option<u64>,
    reject_every: Option<u64>,
    drop_every: Option<u64>,
    never_complete: bool,
    failed_registrations: u32,
    nodes: usize,
    state: Mutex<MockState>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl MockTaskService {
    pub fn new() -> Self {
        Self {
            submit_latency: Duration::from_millis(20),
            processing_time: Duration::from_secs(1),
            fail_every: None,
            reject_every: None,
            drop_every: None,
            never_complete: false,
            failed_registrations: 0,
            nodes: 3,
            state: Mutex::new(MockState::default()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn submit_latency(mut self, latency: Duration) -> Self {
        self.submit_latency = latency;
        self
    }

    pub fn processing_time(mut self, time: Duration) -> Self {
        self.processing_time = time;
        self
    }

    pub fn fail_every(mut self, n: u64) -> Self {
        self.fail_every = Some(n);
        self
    }

    pub fn reject_every(mut self, n: u64) -> Self {
        self.reject_every = Some(n);
        self
    }

    /// Every n-th submission fails with a connection error.
    pub fn drop_every(mut self, n: u64) -> Self {
        self.drop_every = Some(n);
        self
    }

    pub fn never_complete(mut self) -> Self {
        self.never_complete = true;
        self
    }

    pub fn failed_registrations(mut self, n: u32) -> Self {
        self.failed_registrations = n;
        self
    }

    pub fn nodes(mut self, n: usize) -> Self {
        self.nodes = n;
        self
    }

    /// Highest number of concurrent `submit` calls observed.
    pub fn peak_submissions(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }

    pub fn submit_calls(&self) -> u64 {
        self.state.lock().submit_calls
    }

    pub fn accepted_tasks(&self) -> usize {
        self.state.lock().tasks.len()
    }
}

#[async_trait]
impl TaskService for MockTaskService {
    async fn register_user(&self, credentials: &UserCredentials) -> ServiceResult<Session> {
        let fail = {
            let mut state = self.state.lock();
            state.registrations += 1;
            state.registrations <= self.failed_registrations
        };
        if fail {
            return Err(ServiceError::rejected(400, "registration refused"));
        }
        Ok(Session::new(credentials.username.clone(), "token"))
    }

    async fn submit(&self, _session: &Session, _payload: &TaskPayload) -> ServiceResult<TaskId> {
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak.fetch_max(now, Ordering::AcqRel);
        tokio::time::sleep(self.submit_latency).await;
        self.in_flight.fetch_sub(1, Ordering::AcqRel);

        let mut state = self.state.lock();
        state.submit_calls += 1;
        let call = state.submit_calls;
        if self.reject_every.is_some_and(|n| call % n == 0) {
            return Err(ServiceError::rejected(503, "overloaded"));
        }
        if self.drop_every.is_some_and(|n| call % n == 0) {
            return Err(ServiceError::transport(
                TransportErrorKind::Connect,
                "connection refused",
            ));
        }
        state.next_task += 1;
        let number = state.next_task;
        let id = TaskId::new(format!("task-{number}"));
        state.tasks.insert(id.clone(), (Instant::now(), number));
        Ok(id)
    }

    async fn status(&self, _session: &Session, task_id: &TaskId) -> ServiceResult<StatusReport> {
        let mut state = self.state.lock();
        state.status_calls += 1;
        let (submitted, number) = *state
            .tasks
            .get(task_id)
            .ok_or_else(|| ServiceError::rejected(404, "unknown task"))?;

        let node = Some(format!("node-{}", number % 3));
        let status = if self.never_complete || submitted.elapsed() < self.processing_time {
            RemoteStatus::Running
        } else if self.fail_every.is_some_and(|n| number % n == 0) {
            RemoteStatus::Failed
        } else {
            RemoteStatus::Completed
        };
        Ok(StatusReport {
            status,
            assigned_node: node,
        })
    }

    async fn health(&self) -> ServiceResult<()> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(())
    }

    async fn active_nodes(&self) -> ServiceResult<usize> {
        Ok(self.nodes)
    }
}

/// Probe returning a constant reading.
pub struct StaticProbe;

impl ResourceProbe for StaticProbe {
    fn sample(&mut self) -> ResourceSample {
        ResourceSample {
            taken_at: Utc::now(),
            cpu_pct: 40.0,
            memory_pct: 55.0,
            network_bytes_delta: 1_024,
        }
    }
}

/// Short run with a fast cadence.
pub fn quick_settings(users: u32, total_tasks: u64) -> LoadTestSettings {
    let mut settings = LoadTestSettings::default();
    settings.load = TestConfiguration {
        total_tasks,
        concurrent_users: users,
        target_nodes: 3,
        ramp_up_secs: 2.0,
        sustained_secs: 60.0,
        ramp_down_secs: 30.0,
        think_time_secs: 0.1,
        poll_interval_secs: 0.5,
        task_timeout_secs: 10.0,
        submission_concurrency: 4,
        ..TestConfiguration::default()
    };
    settings.sampling.resource_interval_secs = 1.0;
    settings.sampling.health_interval_secs = 1.0;
    settings.sampling.progress_interval_secs = 5.0;
    settings.targets = PerformanceTargets::none();
    settings
}
