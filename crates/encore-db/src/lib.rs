//! Data layer for the Encore request queue.
//!
//! The queue engine owns the authoritative in-memory state and writes
//! every change through a [`Repository`] before broadcasting it. This
//! crate defines that contract and provides two implementations.
//!
//! ```text
//! Queue Engine mutation
//!     |
//!     +-- write-through --> dyn Repository
//!                             |-- PgRepository        (PostgreSQL, durable)
//!                             +-- InMemoryRepository  (tests, dev mode)
//! ```
//!
//! # Modules
//!
//! - [`repository`] -- The [`Repository`] trait and [`PersistedState`]
//! - [`memory`] -- Volatile implementation with failure injection
//! - [`postgres`] -- `PostgreSQL` connection pool and configuration
//! - [`request_store`] -- `PostgreSQL` implementation of the contract
//! - [`error`] -- Shared error types

pub mod error;
pub mod memory;
pub mod postgres;
pub mod repository;
pub mod request_store;

// Re-export primary types for convenience.
pub use error::DbError;
pub use memory::InMemoryRepository;
pub use postgres::{PostgresConfig, PostgresPool};
pub use repository::{PersistedState, Repository, VideoMetadata};
pub use request_store::{PgRepository, RequestRow};
