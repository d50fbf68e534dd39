//! Response bodies of the API gateway.

use serde::Deserialize;

use deai_loadtest_core::{RemoteStatus, StatusReport};

#[derive(Debug, Deserialize)]
pub(crate) struct RegisterResponse {
    pub access_token: String,
}

/// Task ids come back as strings or integers depending on the gateway version.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum WireId {
    Text(String),
    Number(u64),
}

impl WireId {
    pub fn into_string(self) -> String {
        match self {
            Self::Text(id) => id,
            Self::Number(id) => id.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct SubmitResponse {
    pub id: WireId,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TaskStatusResponse {
    pub status: RemoteStatus,
    #[serde(default)]
    pub assigned_node: Option<String>,
    #[serde(default)]
    pub assigned_node_id: Option<String>,
}

impl From<TaskStatusResponse> for StatusReport {
    fn from(response: TaskStatusResponse) -> Self {
        Self {
            status: response.status,
            assigned_node: response.assigned_node.or(response.assigned_node_id),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct NodeEntry {
    #[serde(default)]
    pub is_active: bool,
}
