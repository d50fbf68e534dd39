//! Live Prometheus mirror of the run's counters
//!
//! The registry is owned by the aggregator of one run, so parallel runs (and
//! tests) never share series. An external scraper can pull `render()`.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

const LATENCY_BUCKETS: &[f64] = &[
    0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0,
];

/// Counters and histograms updated as the aggregator records entries.
#[derive(Clone)]
pub struct LiveMetrics {
    registry: Registry,

    /// Submission attempts by outcome (`accepted`, `rejected`)
    pub submissions: IntCounterVec,

    /// Terminal task outcomes by status
    pub outcomes: IntCounterVec,

    /// Errors by classification key
    pub errors: IntCounterVec,

    /// Accepted tasks still waiting for a terminal status
    pub in_flight: IntGauge,

    pub submission_latency: Histogram,

    pub processing_latency: Histogram,

    /// Health probes by result: `ok` or the failure classification
    pub health_checks: IntCounterVec,

    pub health_latency: Histogram,
}

impl LiveMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("deai_loadtest".to_string()), None)?;

        let submissions = IntCounterVec::new(
            Opts::new("submissions_total", "Task submission attempts"),
            &["outcome"],
        )?;
        let outcomes = IntCounterVec::new(
            Opts::new("task_outcomes_total", "Terminal task outcomes"),
            &["status"],
        )?;
        let errors = IntCounterVec::new(
            Opts::new("errors_total", "Errors by classification"),
            &["kind"],
        )?;
        let in_flight = IntGauge::new("tasks_in_flight", "Accepted tasks not yet terminal")?;
        let submission_latency = Histogram::with_opts(
            HistogramOpts::new(
                "submission_latency_seconds",
                "Task submission round trip in seconds",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
        )?;
        let processing_latency = Histogram::with_opts(
            HistogramOpts::new(
                "processing_latency_seconds",
                "Submission to completion in seconds",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
        )?;
        let health_checks = IntCounterVec::new(
            Opts::new("health_checks_total", "Health probes by result"),
            &["result"],
        )?;
        let health_latency = Histogram::with_opts(
            HistogramOpts::new(
                "health_latency_seconds",
                "Successful health probe round trip in seconds",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
        )?;

        registry.register(Box::new(submissions.clone()))?;
        registry.register(Box::new(outcomes.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(in_flight.clone()))?;
        registry.register(Box::new(submission_latency.clone()))?;
        registry.register(Box::new(processing_latency.clone()))?;
        registry.register(Box::new(health_checks.clone()))?;
        registry.register(Box::new(health_latency.clone()))?;

        Ok(Self {
            registry,
            submissions,
            outcomes,
            errors,
            in_flight,
            submission_latency,
            processing_latency,
            health_checks,
            health_latency,
        })
    }

    /// Encodes every series in the Prometheus text exposition format.
    pub fn render(&self) -> prometheus::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| prometheus::Error::Msg(format!("metrics are not valid UTF-8: {e}")))
    }
}

impl std::fmt::Debug for LiveMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveMetrics")
            .field("in_flight", &self.in_flight.get())
            .finish_non_exhaustive()
    }
}
