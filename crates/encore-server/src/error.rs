//! Error types for the service binary.
//!
//! [`ServerError`] wraps every failure that can stop startup, so `main`
//! can propagate with `?`.

/// Top-level error for the service binary.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: encore_core::ConfigError,
    },

    /// Connecting to or loading from storage failed.
    #[error("database error: {source}")]
    Database {
        /// The underlying storage error.
        #[from]
        source: encore_db::DbError,
    },

    /// The metadata client could not be built.
    #[error("metadata error: {source}")]
    Metadata {
        /// The underlying ingestion error.
        #[from]
        source: encore_ingest::IngestError,
    },

    /// Observer API server failed to start.
    #[error("observer error: {source}")]
    Observer {
        /// The underlying startup error.
        #[from]
        source: encore_observer::StartupError,
    },
}
