//! Error types for the Observer API server.
//!
//! [`ObserverError`] unifies all failure modes into a single enum that
//! can be converted into an Axum HTTP response via its
//! [`IntoResponse`](axum::response::IntoResponse) implementation.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use encore_core::QueueError;
use encore_ingest::IngestError;

/// Errors that can occur in the Observer API layer.
#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    /// The referenced request does not exist where expected.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request body or query was malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Queue policy refused the submission (paused, blocked, duplicate).
    #[error("rejected: {0}")]
    Rejected(String),

    /// The queue engine is not running.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Metadata lookup failed upstream.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<QueueError> for ObserverError {
    fn from(err: QueueError) -> Self {
        let text = err.to_string();
        match err {
            QueueError::Validation(msg) => Self::InvalidRequest(msg),
            QueueError::Policy(_) => Self::Rejected(text),
            QueueError::NotFound(_) => Self::NotFound(text),
            QueueError::EngineStopped => Self::Unavailable(text),
        }
    }
}

impl From<IngestError> for ObserverError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Queue(queue) => queue.into(),
            IngestError::Validation(_) | IngestError::UnsupportedLink(_) => {
                Self::InvalidRequest(err.to_string())
            }
            IngestError::Metadata(msg) => Self::Upstream(msg),
        }
    }
}

impl IntoResponse for ObserverError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Self::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::Rejected(msg) => (StatusCode::CONFLICT, msg.clone()),
            Self::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            Self::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}
