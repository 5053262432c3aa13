use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::annotations::AnnotationError;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Invalid filter clause: {0}")]
    InvalidFilter(#[source] serde_json::Error),

    #[error("{0}")]
    Authentication(String),

    #[error("Couldn't find a elastic instance in the config with name {0}.")]
    InstanceNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Upstream request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BackendError {
    /// Error name reported in the JSON body, mirroring the error class callers match on.
    pub fn name(&self) -> &'static str {
        match self {
            BackendError::InvalidInput(_) | BackendError::InvalidFilter(_) => "InputError",
            BackendError::Authentication(_) => "AuthenticationError",
            BackendError::InstanceNotFound(_) => "NotFoundError",
            BackendError::Config(_) => "ConfigError",
            BackendError::Upstream(_) => "UpstreamError",
            BackendError::Timeout { .. } => "TimeoutError",
            BackendError::Internal(_) => "Error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            BackendError::InvalidInput(_) | BackendError::InvalidFilter(_) => {
                StatusCode::BAD_REQUEST
            }
            BackendError::Authentication(_) => StatusCode::UNAUTHORIZED,
            BackendError::InstanceNotFound(_)
            | BackendError::Config(_)
            | BackendError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            BackendError::Upstream(_) => StatusCode::BAD_GATEWAY,
            BackendError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl From<AnnotationError> for BackendError {
    fn from(err: AnnotationError) -> Self {
        BackendError::InvalidInput(err.to_string())
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        BackendError::Upstream(err.to_string())
    }
}

impl IntoResponse for BackendError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = Json(json!({
            "error": {
                "name": self.name(),
                "message": self.to_string(),
            },
            "response": {
                "statusCode": status.as_u16(),
            }
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, BackendError>;
