//! Derived statistics over a frozen metrics snapshot.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use deai_loadtest_core::{ErrorKind, ResourceSample, VirtualUserId};

/// Nearest-rank percentile over an ascending slice.
///
/// `rank = ceil(p / 100 * n)`; the value at `rank - 1` is returned, clamped to
/// the slice bounds. Returns `None` for an empty slice.
#[must_use]
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (p * sorted.len() as f64 / 100.0).ceil() as usize;
    let index = rank.saturating_sub(1).min(sorted.len() - 1);
    Some(sorted[index])
}

/// Summary of one latency series, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatencySummary {
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

impl LatencySummary {
    /// Summarises `samples`; the input is left untouched.
    #[must_use]
    pub fn from_samples(samples: &[Duration]) -> Option<Self> {
        let mut sorted: Vec<f64> = samples.iter().map(Duration::as_secs_f64).collect();
        sorted.sort_by(f64::total_cmp);
        Self::from_sorted(&sorted)
    }

    fn from_sorted(sorted: &[f64]) -> Option<Self> {
        let count = sorted.len();
        let min = *sorted.first()?;
        let max = *sorted.last()?;
        let mean = sorted.iter().sum::<f64>() / count as f64;
        Some(Self {
            count,
            mean,
            min,
            max,
            p50: percentile(sorted, 50.0)?,
            p95: percentile(sorted, 95.0)?,
            p99: percentile(sorted, 99.0)?,
        })
    }
}

/// Mean and peak of one resource gauge, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResourceSummary {
    pub mean: f64,
    pub max: f64,
}

impl ResourceSummary {
    fn from_values(values: impl Iterator<Item = f64>) -> Option<Self> {
        let (count, sum, max) = values.fold((0usize, 0.0, f64::MIN), |(n, sum, max), v| {
            (n + 1, sum + v, max.max(v))
        });
        if count == 0 {
            return None;
        }
        Some(Self {
            mean: sum / count as f64,
            max,
        })
    }

    #[must_use]
    pub fn cpu(samples: &[ResourceSample]) -> Option<Self> {
        Self::from_values(samples.iter().map(|s| s.cpu_pct))
    }

    #[must_use]
    pub fn memory(samples: &[ResourceSample]) -> Option<Self> {
        Self::from_values(samples.iter().map(|s| s.memory_pct))
    }
}

/// Final statistics of a run, derived from a frozen snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateStats {
    pub wall_clock_secs: f64,

    pub users_requested: u32,
    pub users_started: u32,
    pub active_nodes: Option<usize>,

    /// Submission attempts (accepted plus rejected).
    pub tasks_attempted: u64,
    /// Accepted submissions; the "submitted" count.
    pub tasks_submitted: u64,
    pub tasks_rejected: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_timed_out: u64,
    /// Outcomes recorded so far, of every terminal kind.
    pub outcomes_recorded: u64,
    /// Outcomes written by the aggregator at the hard deadline.
    pub forced_timeouts: u64,

    pub submissions_per_second: f64,
    pub completions_per_second: f64,

    /// Rejections, failures and timeouts over accepted submissions.
    pub error_rate_pct: Option<f64>,
    /// Completions over accepted submissions.
    pub success_rate_pct: Option<f64>,

    pub submission_latency: Option<LatencySummary>,
    pub processing_latency: Option<LatencySummary>,
    pub api_response_time: Option<LatencySummary>,

    pub health_checks_total: u64,
    pub health_checks_ok: u64,
    pub uptime_pct: Option<f64>,

    pub resource_samples: usize,
    pub cpu: Option<ResourceSummary>,
    pub memory: Option<ResourceSummary>,
    pub network_bytes_total: u64,

    pub error_counts: BTreeMap<ErrorKind, u64>,
    pub node_distribution: BTreeMap<String, u64>,
    pub per_user_submitted: BTreeMap<VirtualUserId, u64>,
}

impl AggregateStats {
    /// Renders the statistics as pretty JSON for an external report emitter.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

pub(crate) fn rate_per_second(count: u64, wall_clock: Duration) -> f64 {
    let secs = wall_clock.as_secs_f64();
    if secs == 0.0 {
        return 0.0;
    }
    count as f64 / secs
}

pub(crate) fn ratio_pct(numerator: u64, denominator: u64) -> Option<f64> {
    if denominator == 0 {
        return None;
    }
    Some(numerator as f64 * 100.0 / denominator as f64)
}
