//! Error types for the analysis service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::types::JobState;

/// Result type alias for service operations
pub type Result<T> = std::result::Result<T, Error>;

/// Service errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The uploaded document had no content
    #[error("Uploaded file is empty.")]
    EmptyUpload,

    /// Upload exceeded the configured body limit
    #[error("Uploaded file exceeds the {0} byte limit")]
    UploadTooLarge(usize),

    /// Malformed or incomplete client request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Document store failure
    #[error("Failed to save uploaded file: {0}")]
    Storage(#[from] crate::storage::StorageError),

    /// Broker or result backend failure
    #[error("Broker error: {0}")]
    Broker(String),

    /// Rejected job state transition
    #[error("Invalid state transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: uuid::Uuid,
        from: JobState,
        to: JobState,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a broker error
    pub fn broker(message: impl Into<String>) -> Self {
        Self::Broker(message.into())
    }

    /// Create an invalid request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// HTTP status and machine-readable type for this error
    fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            Error::EmptyUpload => (StatusCode::BAD_REQUEST, "empty_upload"),
            Error::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            Error::UploadTooLarge(_) => (StatusCode::PAYLOAD_TOO_LARGE, "upload_too_large"),
            Error::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            Error::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
            Error::Broker(_) => (StatusCode::INTERNAL_SERVER_ERROR, "broker_error"),
            Error::InvalidTransition { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "state_error")
            }
            Error::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error"),
            Error::Json(_) => (StatusCode::INTERNAL_SERVER_ERROR, "json_error"),
            Error::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Error::Broker(err.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_type) = self.classify();
        if status.is_server_error() {
            tracing::error!("Request failed ({}): {}", error_type, self);
        } else {
            tracing::warn!("Rejected request ({}): {}", error_type, self);
        }

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}
