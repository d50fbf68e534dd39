use std::fmt;

use serde::{Serialize, Serializer};
use thiserror::Error;

/// Transport failure classes observed by the client layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportErrorKind {
    /// Connection refused or host unreachable.
    Connect,
    /// The request did not complete within the client timeout.
    Timeout,
    /// Any other network-level failure (closed connection, protocol error).
    Other,
}

impl TransportErrorKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Timeout => "timeout",
            Self::Other => "other",
        }
    }
}

/// Error returned by a single call against the remote task service.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// The service answered but declined the request.
    #[error("request rejected with HTTP {status}: {reason}")]
    Rejected {
        /// HTTP status code returned by the service.
        status: u16,
        /// Body or status text describing the rejection.
        reason: String,
    },

    /// The request never produced a response.
    #[error("transport error ({}): {message}", kind.as_str())]
    Transport {
        /// Failure class.
        kind: TransportErrorKind,
        /// Underlying error message.
        message: String,
    },

    /// The response body could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl ServiceError {
    /// Creates a `Rejected` variant.
    #[must_use]
    pub fn rejected(status: u16, reason: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            reason: reason.into(),
        }
    }

    /// Creates a `Transport` variant.
    #[must_use]
    pub fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self::Transport {
            kind,
            message: message.into(),
        }
    }

    /// Returns true when the call never reached a decision on the remote side.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Error-kind key used for aggregation.
    #[must_use]
    pub fn classification(&self) -> ErrorKind {
        match self {
            Self::Rejected { status, .. } => ErrorKind::Http(*status),
            Self::Transport { kind, .. } => ErrorKind::Transport(*kind),
            Self::Decode(_) => ErrorKind::Decode,
        }
    }
}

/// Convenient result alias for remote service calls.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Classification key for every error counted during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorKind {
    /// Submission or status call answered with a non-success HTTP status.
    Http(u16),
    /// Network failure during submission or polling.
    Transport(TransportErrorKind),
    /// Undecodable response body.
    Decode,
    /// The remote service reported the task itself as failed.
    TaskFailed,
    /// No terminal status observed within the task timeout.
    TimedOut,
    /// A virtual user could not be provisioned.
    Setup,
    /// A health probe did not succeed.
    HealthCheck,
    /// The service answered a submission with the id of a task still in flight.
    DuplicateTaskId,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(status) => write!(f, "HTTP_{status}"),
            Self::Transport(kind) => write!(f, "transport_{}", kind.as_str()),
            Self::Decode => f.write_str("decode"),
            Self::TaskFailed => f.write_str("task_failed"),
            Self::TimedOut => f.write_str("timeout"),
            Self::Setup => f.write_str("setup"),
            Self::HealthCheck => f.write_str("health_check"),
            Self::DuplicateTaskId => f.write_str("duplicate_task_id"),
        }
    }
}

impl Serialize for ErrorKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Run-level error for the load test as a whole.
#[derive(Debug, Error)]
pub enum LoadTestError {
    /// Configuration sources could not be read or deserialised.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Configuration was read but failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Setup left no usable virtual user; the run cannot proceed.
    #[error("no virtual users could be provisioned ({requested} requested)")]
    NoVirtualUsers {
        /// Number of users the configuration asked for.
        requested: u32,
    },

    /// Unexpected internal error.
    #[error("internal error: {message}")]
    Internal {
        /// Human-readable details for debugging purposes.
        message: String,
    },
}

impl LoadTestError {
    /// Creates an `InvalidConfig` variant.
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Creates an `Internal` variant.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Convenient result alias for run-level operations.
pub type LoadTestResult<T> = Result<T, LoadTestError>;
