//! Bounded submission gate
//!
//! Caps how many submission requests are in flight at once across all
//! virtual users. Waiters are admitted in arrival order (the semaphore is
//! FIFO-fair), so no user starves while others keep submitting.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::trace;

use deai_loadtest_core::{
    ErrorKind, LoadTestError, LoadTestResult, Session, SubmissionResult, TaskPayload, TaskService,
    TaskSubmission, VirtualUserId,
};

#[derive(Debug)]
struct Counters {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// Shared gate; clone freely.
#[derive(Debug, Clone)]
pub struct SubmissionGate {
    semaphore: Arc<Semaphore>,
    counters: Arc<Counters>,
    ceiling: usize,
}

/// Admission slot held for the duration of one request.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
    counters: Arc<Counters>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.counters.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

impl SubmissionGate {
    /// Creates a gate admitting at most `ceiling` concurrent requests.
    pub fn new(ceiling: usize) -> LoadTestResult<Self> {
        if ceiling == 0 {
            return Err(LoadTestError::invalid_config(
                "submission concurrency must be at least 1",
            ));
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(ceiling)),
            counters: Arc::new(Counters {
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
            ceiling,
        })
    }

    #[must_use]
    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Requests currently holding a slot.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.counters.in_flight.load(Ordering::Acquire)
    }

    /// Highest concurrent occupancy observed.
    #[must_use]
    pub fn peak(&self) -> usize {
        self.counters.peak.load(Ordering::Acquire)
    }

    /// Waits for a free slot.
    pub async fn acquire(&self) -> LoadTestResult<GatePermit> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| LoadTestError::internal("submission gate closed"))?;
        let now = self.counters.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.counters.peak.fetch_max(now, Ordering::AcqRel);
        Ok(GatePermit {
            _permit: permit,
            counters: Arc::clone(&self.counters),
        })
    }

    /// Submits `payload` through the gate and returns the timed record.
    ///
    /// Latency covers the request round trip only, not the wait for a slot.
    /// `sent_at` is taken just before the request goes out.
    pub async fn submit(
        &self,
        service: &dyn TaskService,
        session: &Session,
        user: VirtualUserId,
        payload: &TaskPayload,
    ) -> LoadTestResult<TaskSubmission> {
        let _permit = self.acquire().await?;
        let submitted_at = Utc::now();
        let start = Instant::now();
        let response = service.submit(session, payload).await;
        let latency = start.elapsed();

        let result = match response {
            Ok(task_id) => SubmissionResult::Accepted(task_id),
            Err(e) => {
                let kind: ErrorKind = e.classification();
                trace!(user = %user, kind = %kind, "submission rejected");
                SubmissionResult::Rejected {
                    kind,
                    reason: e.to_string(),
                }
            }
        };

        Ok(TaskSubmission {
            user,
            submitted_at,
            sent_at: start.into_std(),
            latency,
            result,
        })
    }
}
