//! Queue engine, broadcast hub, and statistics for Encore.
//!
//! ```text
//! ingestion / operator ──► EngineHandle ──► QueueEngine task
//!                                              │  QueueState (single writer)
//!                                              │  Repository (write-through)
//!                                              ▼
//!                                         BroadcastHub ──► observers
//!                                              │
//!                                         StateView ──► stats, snapshots
//! ```
//!
//! # Modules
//!
//! - [`config`] -- YAML configuration with environment overrides
//! - [`error`] -- Caller-facing error taxonomy
//! - [`policy`] -- Injectable submission rules
//! - [`state`] -- Queue state and transition rules
//! - [`engine`] -- The serialized mutation task and its handle
//! - [`hub`] -- Observer registry and fan-out
//! - [`stats`] -- Aggregates over history

pub mod config;
pub mod engine;
pub mod error;
pub mod hub;
pub mod policy;
pub mod state;
pub mod stats;

pub use config::{ConfigError, EncoreConfig};
pub use engine::{Clock, EngineHandle, EngineSettings, QueueEngine, SystemClock};
pub use error::{PolicyRejection, QueueError};
pub use hub::{BroadcastHub, ObserverId, StateView, Subscription};
pub use policy::{AllowAll, DuplicateCooldown, PolicyChain, PolicyContext, SubmissionPolicy};
pub use state::{EngineEvent, NewRequest};
pub use stats::{StatsClock, StatsError};
