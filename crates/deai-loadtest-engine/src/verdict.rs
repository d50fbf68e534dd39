//! Pass/fail assessment of a finished run against its performance targets.

use serde::Serialize;

use deai_loadtest_core::PerformanceTargets;

use crate::stats::AggregateStats;

/// Direction a target is checked in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    /// Observed value must be `<=` the threshold (latency, error and resource ceilings).
    AtMost,
    /// Observed value must be `>=` the threshold (throughput and uptime floors).
    AtLeast,
}

impl Comparison {
    fn holds(self, observed: f64, threshold: f64) -> bool {
        match self {
            Self::AtMost => observed <= threshold,
            Self::AtLeast => observed >= threshold,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Self::AtMost => "<=",
            Self::AtLeast => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    Pass,
    Fail,
    /// Nothing was collected for the statistic this target judges.
    NotEvaluated,
}

/// Result for one target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetResult {
    pub name: &'static str,
    pub comparison: Comparison,
    pub threshold: f64,
    pub observed: Option<f64>,
    pub status: TargetStatus,
}

impl TargetResult {
    fn judge(
        name: &'static str,
        comparison: Comparison,
        threshold: f64,
        observed: Option<f64>,
    ) -> Self {
        let status = match observed {
            None => TargetStatus::NotEvaluated,
            Some(value) if comparison.holds(value, threshold) => TargetStatus::Pass,
            Some(_) => TargetStatus::Fail,
        };
        Self {
            name,
            comparison,
            threshold,
            observed,
            status,
        }
    }
}

/// Final verdict of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerdictReport {
    pub submissions_per_second: f64,
    pub completions_per_second: f64,
    pub submission_p95_secs: Option<f64>,
    pub submission_p99_secs: Option<f64>,
    pub processing_p95_secs: Option<f64>,
    pub processing_p99_secs: Option<f64>,
    pub uptime_pct: Option<f64>,
    /// One entry per defined target, in table order.
    pub results: Vec<TargetResult>,
    /// True iff at least one target was evaluated and none failed.
    pub passed: bool,
}

impl VerdictReport {
    #[must_use]
    pub fn failures(&self) -> Vec<&TargetResult> {
        self.results
            .iter()
            .filter(|r| r.status == TargetStatus::Fail)
            .collect()
    }

    #[must_use]
    pub fn not_evaluated(&self) -> Vec<&TargetResult> {
        self.results
            .iter()
            .filter(|r| r.status == TargetStatus::NotEvaluated)
            .collect()
    }

    /// One line per failed target.
    #[must_use]
    pub fn failure_summary(&self) -> String {
        let failures = self.failures();
        if failures.is_empty() {
            return "All evaluated targets passed".to_string();
        }
        failures
            .iter()
            .map(|r| {
                format!(
                    "{} {:.4} violates {} {:.4}",
                    r.name,
                    r.observed.unwrap_or_default(),
                    r.comparison.symbol(),
                    r.threshold
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Judges final statistics against a target table.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerdictEvaluator;

impl VerdictEvaluator {
    /// Pure function of its inputs.
    #[must_use]
    pub fn evaluate(stats: &AggregateStats, targets: &PerformanceTargets) -> VerdictReport {
        use Comparison::{AtLeast, AtMost};

        let throughput = (stats.wall_clock_secs > 0.0).then_some(stats.submissions_per_second);
        let checks = [
            (
                "max_submission_time",
                AtMost,
                targets.max_submission_time_secs,
                stats.submission_latency.map(|l| l.max),
            ),
            (
                "max_processing_time",
                AtMost,
                targets.max_processing_time_secs,
                stats.processing_latency.map(|l| l.p95),
            ),
            (
                "min_throughput",
                AtLeast,
                targets.min_throughput_per_sec,
                throughput,
            ),
            (
                "max_api_response_time",
                AtMost,
                targets.max_api_response_time_secs,
                stats.api_response_time.map(|l| l.mean),
            ),
            (
                "max_error_rate",
                AtMost,
                targets.max_error_rate_pct,
                stats.error_rate_pct,
            ),
            (
                "min_success_rate",
                AtLeast,
                targets.min_success_rate_pct,
                stats.success_rate_pct,
            ),
            (
                "max_cpu_usage",
                AtMost,
                targets.max_cpu_usage_pct,
                stats.cpu.map(|c| c.max),
            ),
            (
                "max_memory_usage",
                AtMost,
                targets.max_memory_usage_pct,
                stats.memory.map(|m| m.max),
            ),
            (
                "min_uptime",
                AtLeast,
                targets.min_uptime_pct,
                stats.uptime_pct,
            ),
        ];

        let results: Vec<TargetResult> = checks
            .into_iter()
            .filter_map(|(name, comparison, threshold, observed)| {
                threshold.map(|t| TargetResult::judge(name, comparison, t, observed))
            })
            .collect();

        let any_evaluated = results
            .iter()
            .any(|r| r.status != TargetStatus::NotEvaluated);
        let any_failed = results.iter().any(|r| r.status == TargetStatus::Fail);

        VerdictReport {
            submissions_per_second: stats.submissions_per_second,
            completions_per_second: stats.completions_per_second,
            submission_p95_secs: stats.submission_latency.map(|l| l.p95),
            submission_p99_secs: stats.submission_latency.map(|l| l.p99),
            processing_p95_secs: stats.processing_latency.map(|l| l.p95),
            processing_p99_secs: stats.processing_latency.map(|l| l.p99),
            uptime_pct: stats.uptime_pct,
            results,
            passed: any_evaluated && !any_failed,
        }
    }
}
