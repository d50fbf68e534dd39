//! Performance targets a run is judged against.

use serde::{Deserialize, Serialize};

use crate::error::{LoadTestError, LoadTestResult};

/// Table of thresholds. Every field is optional; an unset field is not judged.
///
/// Latencies are in seconds, rates and resource ceilings in percent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceTargets {
    /// Upper bound for the slowest task submission.
    pub max_submission_time_secs: Option<f64>,

    /// Upper bound for the p95 end-to-end processing latency.
    pub max_processing_time_secs: Option<f64>,

    /// Lower bound for accepted submissions per second.
    pub min_throughput_per_sec: Option<f64>,

    /// Upper bound for the mean health endpoint round trip.
    pub max_api_response_time_secs: Option<f64>,

    /// Upper bound for errors over submission attempts.
    pub max_error_rate_pct: Option<f64>,

    /// Lower bound for completed over accepted tasks.
    pub min_success_rate_pct: Option<f64>,

    /// Upper bound for peak CPU usage.
    pub max_cpu_usage_pct: Option<f64>,

    /// Upper bound for peak memory usage.
    pub max_memory_usage_pct: Option<f64>,

    /// Lower bound for the share of successful health probes.
    pub min_uptime_pct: Option<f64>,
}

impl Default for PerformanceTargets {
    fn default() -> Self {
        Self {
            max_submission_time_secs: Some(5.0),
            max_processing_time_secs: Some(60.0),
            min_throughput_per_sec: Some(50.0),
            max_api_response_time_secs: Some(1.0),
            max_error_rate_pct: Some(5.0),
            min_success_rate_pct: Some(95.0),
            max_cpu_usage_pct: Some(75.0),
            max_memory_usage_pct: Some(80.0),
            min_uptime_pct: Some(99.9),
        }
    }
}

impl PerformanceTargets {
    /// A table with no thresholds at all.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_submission_time_secs: None,
            max_processing_time_secs: None,
            min_throughput_per_sec: None,
            max_api_response_time_secs: None,
            max_error_rate_pct: None,
            min_success_rate_pct: None,
            max_cpu_usage_pct: None,
            max_memory_usage_pct: None,
            min_uptime_pct: None,
        }
    }

    /// Production release gate (strict)
    #[must_use]
    pub fn production() -> Self {
        Self {
            max_submission_time_secs: Some(1.0),
            max_processing_time_secs: Some(30.0),
            min_throughput_per_sec: Some(100.0),
            max_api_response_time_secs: Some(0.5),
            max_error_rate_pct: Some(0.5),
            min_success_rate_pct: Some(99.5),
            max_cpu_usage_pct: Some(75.0),
            max_memory_usage_pct: Some(80.0),
            min_uptime_pct: Some(99.9),
        }
    }

    /// Development criteria (relaxed)
    #[must_use]
    pub fn development() -> Self {
        Self {
            max_submission_time_secs: Some(10.0),
            max_processing_time_secs: Some(120.0),
            min_throughput_per_sec: Some(1.0),
            max_api_response_time_secs: Some(2.0),
            max_error_rate_pct: Some(10.0),
            min_success_rate_pct: Some(90.0),
            max_cpu_usage_pct: Some(95.0),
            max_memory_usage_pct: Some(95.0),
            min_uptime_pct: Some(99.0),
        }
    }

    /// Checks that every set threshold is finite, non-negative, and that
    /// percentages stay within 0..=100.
    pub fn validate(&self) -> LoadTestResult<()> {
        let seconds = [
            ("max_submission_time_secs", self.max_submission_time_secs),
            ("max_processing_time_secs", self.max_processing_time_secs),
            ("min_throughput_per_sec", self.min_throughput_per_sec),
            ("max_api_response_time_secs", self.max_api_response_time_secs),
        ];
        for (name, value) in seconds {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(LoadTestError::invalid_config(format!(
                        "targets.{name} must be a non-negative number"
                    )));
                }
            }
        }

        let percentages = [
            ("max_error_rate_pct", self.max_error_rate_pct),
            ("min_success_rate_pct", self.min_success_rate_pct),
            ("max_cpu_usage_pct", self.max_cpu_usage_pct),
            ("max_memory_usage_pct", self.max_memory_usage_pct),
            ("min_uptime_pct", self.min_uptime_pct),
        ];
        for (name, value) in percentages {
            if let Some(v) = value {
                if !(0.0..=100.0).contains(&v) {
                    return Err(LoadTestError::invalid_config(format!(
                        "targets.{name} must be within 0..=100"
                    )));
                }
            }
        }

        Ok(())
    }
}
