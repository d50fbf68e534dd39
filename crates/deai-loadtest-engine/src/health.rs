//! Periodic liveness probe of the remote service.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use deai_loadtest_core::TaskService;

use crate::aggregator::MetricsRecorder;

/// Background task calling `health()` once per interval until cancelled.
///
/// Each probe lands in the aggregator as an uptime observation; successful
/// probes also feed the API response time series.
#[derive(Debug)]
pub struct HealthProbe {
    handle: JoinHandle<u64>,
    cancel: CancellationToken,
}

impl HealthProbe {
    pub fn spawn(
        service: Arc<dyn TaskService>,
        every: Duration,
        recorder: MetricsRecorder,
        cancel: CancellationToken,
    ) -> Self {
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            info!(interval = ?every, "health probe started");
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut probes = 0u64;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let start = Instant::now();
                        let result = tokio::select! {
                            _ = token.cancelled() => break,
                            result = service.health() => result,
                        };
                        let latency = start.elapsed();
                        match result {
                            Ok(()) => {
                                debug!(latency_ms = latency.as_millis() as u64, "health ok");
                                recorder.record_health_check(latency, None);
                            }
                            Err(e) => {
                                warn!(error = %e, "health check failed");
                                recorder.record_health_check(latency, Some(e.classification()));
                            }
                        }
                        probes += 1;
                    }
                }
            }

            debug!(probes, "health probe stopped");
            probes
        });

        Self { handle, cancel }
    }

    /// Stops probing and returns how many probes completed.
    pub async fn stop(self) -> u64 {
        self.cancel.cancel();
        self.handle.await.unwrap_or_else(|e| {
            tracing::error!(error = %e, "health probe task failed");
            0
        })
    }
}
