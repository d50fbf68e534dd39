//! Load generation, task tracking and metrics aggregation for the DeAI
//! task-processing service.
//!
//! The entry point is [`LoadController`]: give it a [`TaskService`]
//! implementation and [`LoadTestSettings`], then `run()` it to get a
//! [`LoadTestReport`] holding the final statistics and verdict.
//!
//! [`TaskService`]: deai_loadtest_core::TaskService
//! [`LoadTestSettings`]: deai_loadtest_core::LoadTestSettings

pub mod aggregator;
pub mod controller;
pub mod gate;
pub mod health;
pub mod live;
pub mod sampler;
pub mod stats;
pub mod telemetry;
pub mod tracker;
pub mod user;
pub mod verdict;

pub use aggregator::{compute_stats, MetricsAggregator, MetricsRecorder, MetricsSnapshot};
pub use controller::{LoadController, LoadPhase, LoadShape, LoadTestReport};
pub use gate::{GatePermit, SubmissionGate};
pub use health::HealthProbe;
pub use live::LiveMetrics;
pub use sampler::{ResourceProbe, ResourceSampler, SystemProbe};
pub use stats::{percentile, AggregateStats, LatencySummary, ResourceSummary};
pub use tracker::{CompletionTracker, TrackerPhase, TrackerTiming};
pub use user::{SimulationContext, StopReason, UserReport, VirtualUser};
pub use verdict::{Comparison, TargetResult, TargetStatus, VerdictEvaluator, VerdictReport};
