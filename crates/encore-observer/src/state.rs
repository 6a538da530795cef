//! Shared application state for the Observer API server.
//!
//! [`AppState`] holds handles, not data: the hub serves every read from
//! the engine's last published view, and every write goes through the
//! engine handle or the ingestion adapter.

use std::sync::Arc;
use std::time::Duration;

use encore_core::{BroadcastHub, EncoreConfig, EngineHandle, StatsClock};
use encore_ingest::IngestionAdapter;

/// Tunables for the observer endpoints and the stats broadcaster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverOptions {
    /// Which calendar day counts as "today".
    pub stats_clock: StatsClock,
    /// Length of the all-time top requesters list.
    pub top_requesters: usize,
    /// Period of the aggregate statistics broadcast.
    pub stats_interval: Duration,
}

impl ObserverOptions {
    /// Derive options from the loaded configuration.
    pub fn from_config(config: &EncoreConfig) -> Self {
        Self {
            stats_clock: StatsClock::from_offset(config.stats.fixed_offset()),
            top_requesters: config.observers.top_requesters,
            stats_interval: Duration::from_secs(config.observers.stats_interval_secs.max(1)),
        }
    }
}

impl Default for ObserverOptions {
    fn default() -> Self {
        Self::from_config(&EncoreConfig::default())
    }
}

/// Shared state for the Axum application.
///
/// Wrapped in [`Arc`] and injected via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    /// Observer registry and last published state.
    pub hub: Arc<BroadcastHub>,
    /// Sender side of the queue engine.
    pub engine: EngineHandle,
    /// Submission path for new requests.
    pub ingest: IngestionAdapter,
    /// Endpoint and broadcaster tunables.
    pub options: ObserverOptions,
}

impl AppState {
    /// Bundle the running components.
    pub const fn new(
        hub: Arc<BroadcastHub>,
        engine: EngineHandle,
        ingest: IngestionAdapter,
        options: ObserverOptions,
    ) -> Self {
        Self {
            hub,
            engine,
            ingest,
            options,
        }
    }
}
