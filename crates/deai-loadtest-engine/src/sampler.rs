//! Periodic sampling of local CPU, memory and network usage.

use std::time::Duration;

use chrono::Utc;
use sysinfo::{CpuExt, NetworkExt, NetworksExt, System, SystemExt};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use deai_loadtest_core::ResourceSample;

use crate::aggregator::MetricsRecorder;

/// Source of resource readings.
pub trait ResourceProbe: Send + 'static {
    fn sample(&mut self) -> ResourceSample;
}

impl<P: ResourceProbe + ?Sized> ResourceProbe for Box<P> {
    fn sample(&mut self) -> ResourceSample {
        (**self).sample()
    }
}

/// Reads the host's resource usage through `sysinfo`.
pub struct SystemProbe {
    system: System,
}

impl SystemProbe {
    #[must_use]
    pub fn new() -> Self {
        let mut system = System::new();
        // CPU usage is a delta between refreshes; prime the first one.
        system.refresh_cpu();
        system.refresh_memory();
        system.refresh_networks_list();
        Self { system }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SystemProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemProbe").finish_non_exhaustive()
    }
}

impl ResourceProbe for SystemProbe {
    fn sample(&mut self) -> ResourceSample {
        self.system.refresh_cpu();
        self.system.refresh_memory();
        self.system.refresh_networks();

        let total = self.system.total_memory();
        let memory_pct = if total == 0 {
            0.0
        } else {
            self.system.used_memory() as f64 / total as f64 * 100.0
        };
        let network_bytes_delta = self
            .system
            .networks()
            .iter()
            .map(|(_, data)| data.received() + data.transmitted())
            .sum();

        ResourceSample {
            taken_at: Utc::now(),
            cpu_pct: f64::from(self.system.global_cpu_info().cpu_usage()),
            memory_pct,
            network_bytes_delta,
        }
    }
}

/// Background task recording one sample per interval until cancelled.
#[derive(Debug)]
pub struct ResourceSampler {
    handle: JoinHandle<usize>,
    cancel: CancellationToken,
}

impl ResourceSampler {
    /// Starts sampling immediately, then every `every`.
    pub fn spawn<P: ResourceProbe>(
        mut probe: P,
        every: Duration,
        recorder: MetricsRecorder,
        cancel: CancellationToken,
    ) -> Self {
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            info!(interval = ?every, "resource sampler started");
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut taken = 0usize;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let sample = probe.sample();
                        debug!(
                            cpu_pct = sample.cpu_pct,
                            memory_pct = sample.memory_pct,
                            "resource sample"
                        );
                        recorder.record_resource_sample(sample);
                        taken += 1;
                    }
                }
            }

            debug!(samples = taken, "resource sampler stopped");
            taken
        });

        Self { handle, cancel }
    }

    /// Stops sampling and returns how many samples were taken.
    pub async fn stop(self) -> usize {
        self.cancel.cancel();
        self.handle.await.unwrap_or_else(|e| {
            tracing::error!(error = %e, "resource sampler task failed");
            0
        })
    }
}
