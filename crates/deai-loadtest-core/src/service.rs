//! Seam between the engine and the remote task-processing service.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::ServiceResult;
use crate::ids::TaskId;
use crate::task::{RemoteStatus, TaskPayload};

/// Registration data for one virtual user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCredentials {
    pub username: String,
    pub email: String,
    pub password: String,
    pub near_account_id: String,
}

impl UserCredentials {
    /// Unique throwaway credentials for the `index`-th virtual user.
    #[must_use]
    pub fn generated(index: u32, password: impl Into<String>) -> Self {
        let stamp = Utc::now().timestamp_millis() + i64::from(index);
        Self {
            username: format!("load_test_user_{stamp}"),
            email: format!("load_test_{stamp}@deai.test"),
            password: password.into(),
            near_account_id: format!("load_test_{stamp}.testnet"),
        }
    }
}

/// Authenticated session handle returned by registration.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub username: String,
    access_token: String,
}

impl Session {
    #[must_use]
    pub fn new(username: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            access_token: access_token.into(),
        }
    }

    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("username", &self.username)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Answer of the status endpoint for one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub status: RemoteStatus,
    pub assigned_node: Option<String>,
}

/// Operations the engine consumes from the remote service.
#[async_trait]
pub trait TaskService: Send + Sync {
    /// Registers a user and returns its session.
    async fn register_user(&self, credentials: &UserCredentials) -> ServiceResult<Session>;

    /// Submits one task on behalf of `session`.
    async fn submit(&self, session: &Session, payload: &TaskPayload) -> ServiceResult<TaskId>;

    /// Fetches the current status of an accepted task.
    async fn status(&self, session: &Session, task_id: &TaskId) -> ServiceResult<StatusReport>;

    /// Liveness of the service.
    async fn health(&self) -> ServiceResult<()>;

    /// Number of worker nodes currently reported active.
    async fn active_nodes(&self) -> ServiceResult<usize>;
}
