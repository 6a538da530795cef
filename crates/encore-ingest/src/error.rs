//! Error types for the ingestion adapter.

use encore_core::QueueError;

/// Errors that can occur while turning a submission into a queued request.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The submission failed field validation.
    #[error("invalid submission: {0}")]
    Validation(#[from] validator::ValidationErrors),

    /// The link is not one we can resolve and no title was supplied.
    #[error("unsupported song link: {0}")]
    UnsupportedLink(String),

    /// The metadata lookup failed and no title was supplied.
    #[error("metadata lookup failed: {0}")]
    Metadata(String),

    /// The queue refused the request.
    #[error(transparent)]
    Queue(#[from] QueueError),
}
