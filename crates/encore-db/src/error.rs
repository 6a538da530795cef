//! Storage error type.
//!
//! The engine never shows these to observers: a failed write is retried
//! and, if it keeps failing, turned into degraded mode.

/// Anything that can go wrong talking to the durable store.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// The driver reported a failure (connection, query, pool timeout).
    #[error("database: {0}")]
    Postgres(#[from] sqlx::Error),

    /// Applying the schema failed at startup.
    #[error("schema migration: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A JSON column (settings values) did not round-trip.
    #[error("json column: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A row holds a value the domain model cannot represent.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// The in-memory store was told to fail.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Connection settings are unusable.
    #[error("bad database settings: {0}")]
    Config(String),
}
