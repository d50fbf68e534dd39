//! Core domain types and traits for the DeAI load validation engine.

pub mod config;
pub mod error;
pub mod ids;
pub mod service;
pub mod targets;
pub mod task;

pub use config::{ApiConfig, LoadTestSettings, SamplingConfig, TestConfiguration};
pub use error::{
    ErrorKind, LoadTestError, LoadTestResult, ServiceError, ServiceResult, TransportErrorKind,
};
pub use ids::{RunId, TaskId, VirtualUserId};
pub use service::{Session, StatusReport, TaskService, UserCredentials};
pub use targets::PerformanceTargets;
pub use task::{
    RemoteStatus, ResourceSample, SubmissionResult, TaskKind, TaskOutcome, TaskPayload,
    TaskSubmission, TerminalStatus,
};
