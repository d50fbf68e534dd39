//! `reqwest` client for the DeAI API gateway
//!
//! Endpoints:
//! - `POST /api/v1/auth/register`: create a user, returns `access_token`
//! - `POST /api/v1/tasks`: submit a task (bearer auth), returns `id`
//! - `GET /api/v1/tasks/{id}`: task status and assigned node
//! - `GET /api/v1/nodes`: registered nodes with `is_active`
//! - `GET /health`: liveness

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use deai_loadtest_core::{
    ApiConfig, ServiceError, ServiceResult, Session, StatusReport, TaskId, TaskPayload,
    TaskService, TransportErrorKind, UserCredentials,
};

use crate::wire::{NodeEntry, RegisterResponse, SubmitResponse, TaskStatusResponse};

/// Longest rejection body kept in error messages.
const MAX_REASON_LEN: usize = 256;

/// Task service reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTaskService {
    client: Client,
    base_url: String,
}

impl HttpTaskService {
    /// Builds a client with the configured request timeout.
    pub fn new(config: &ApiConfig) -> ServiceResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ServiceError::transport(TransportErrorKind::Other, e.to_string()))?;
        Ok(Self::with_client(client, &config.base_url))
    }

    /// Uses an existing client; its timeouts apply.
    #[must_use]
    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(request: RequestBuilder) -> ServiceResult<Response> {
        let response = request.send().await.map_err(classify)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let reason = if body.is_empty() {
            status.canonical_reason().unwrap_or("unknown").to_string()
        } else {
            body.chars().take(MAX_REASON_LEN).collect()
        };
        trace!(status = status.as_u16(), reason = %reason, "request rejected");
        Err(ServiceError::rejected(status.as_u16(), reason))
    }

    async fn json<T: DeserializeOwned>(request: RequestBuilder) -> ServiceResult<T> {
        Self::send(request)
            .await?
            .json::<T>()
            .await
            .map_err(classify)
    }
}

/// Maps a `reqwest` failure onto the service error taxonomy.
fn classify(error: reqwest::Error) -> ServiceError {
    if error.is_decode() {
        return ServiceError::Decode(error.to_string());
    }
    let kind = if error.is_timeout() {
        TransportErrorKind::Timeout
    } else if error.is_connect() {
        TransportErrorKind::Connect
    } else {
        TransportErrorKind::Other
    };
    ServiceError::transport(kind, error.to_string())
}

#[async_trait]
impl TaskService for HttpTaskService {
    async fn register_user(&self, credentials: &UserCredentials) -> ServiceResult<Session> {
        let request = self
            .client
            .post(self.url("/api/v1/auth/register"))
            .json(credentials);
        let response: RegisterResponse = Self::json(request).await?;
        debug!(username = %credentials.username, "user registered");
        Ok(Session::new(
            credentials.username.clone(),
            response.access_token,
        ))
    }

    async fn submit(&self, session: &Session, payload: &TaskPayload) -> ServiceResult<TaskId> {
        let request = self
            .client
            .post(self.url("/api/v1/tasks"))
            .bearer_auth(session.access_token())
            .json(payload);
        let response: SubmitResponse = Self::json(request).await?;
        Ok(TaskId::new(response.id.into_string()))
    }

    async fn status(&self, session: &Session, task_id: &TaskId) -> ServiceResult<StatusReport> {
        let request = self
            .client
            .get(self.url(&format!("/api/v1/tasks/{}", task_id.as_str())))
            .bearer_auth(session.access_token());
        let response: TaskStatusResponse = Self::json(request).await?;
        Ok(response.into())
    }

    async fn health(&self) -> ServiceResult<()> {
        Self::send(self.client.get(self.url("/health"))).await?;
        Ok(())
    }

    async fn active_nodes(&self) -> ServiceResult<usize> {
        let nodes: Vec<NodeEntry> = Self::json(self.client.get(self.url("/api/v1/nodes"))).await?;
        Ok(nodes.iter().filter(|n| n.is_active).count())
    }
}
