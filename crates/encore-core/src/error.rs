//! Error types returned to callers of the queue engine.
//!
//! Persistence failures are deliberately absent: the engine retries them
//! and then degrades instead of failing the caller.

use encore_types::RequestId;

/// Why a submission was refused by queue policy.
///
/// Reported to the submitter only; never broadcast to observers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyRejection {
    /// The `queue_enabled` setting is off.
    #[error("the queue is currently closed")]
    QueuePaused,

    /// The requester is on the blocklist.
    #[error("requester '{login}' is blocked")]
    Blocklisted {
        /// Lowercase login of the blocked requester.
        login: String,
    },

    /// The same requester asked for the same song too recently.
    #[error("'{song_link}' was already requested by '{login}' recently")]
    Duplicate {
        /// Lowercase login of the requester.
        login: String,
        /// The duplicated link.
        song_link: String,
    },

    /// An injected policy refused the request.
    #[error("{0}")]
    Custom(String),
}

/// Errors returned by queue engine operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// The submission or command was malformed.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Queue policy refused the submission.
    #[error("rejected: {0}")]
    Policy(#[from] PolicyRejection),

    /// The operation referenced a request that is not where it was expected.
    #[error("request {0} not found")]
    NotFound(RequestId),

    /// The engine task is no longer running.
    #[error("queue engine has stopped")]
    EngineStopped,
}
