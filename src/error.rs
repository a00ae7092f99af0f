//! Error types for the model hub.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::config::ModelName;
use crate::workers::WorkerId;

/// Errors surfaced by the hub.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// Configuration could not be loaded or failed validation.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The OS refused to spawn a worker process.
    #[error("failed to spawn worker {id}: {source}")]
    Spawn {
        id: WorkerId,
        #[source]
        source: std::io::Error,
    },

    /// The requested model is not in the configuration.
    #[error("unknown model: {0}")]
    UnknownModel(ModelName),

    /// The client request body could not be decoded.
    #[error("invalid request: {0}")]
    RequestMalformed(String),

    /// Forwarding a prediction to a worker failed.
    #[error("worker {id}: {message}")]
    WorkerForward { id: WorkerId, message: String },
}

impl HubError {
    pub fn forward(id: WorkerId, message: impl Into<String>) -> Self {
        Self::WorkerForward { id, message: message.into() }
    }
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = match &self {
            HubError::RequestMalformed(_) => StatusCode::BAD_REQUEST,
            HubError::UnknownModel(_) => StatusCode::BAD_REQUEST,
            HubError::WorkerForward { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            HubError::ConfigInvalid(_) | HubError::Spawn { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
