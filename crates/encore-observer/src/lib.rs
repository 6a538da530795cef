//! Observer API server for the Encore song request queue.
//!
//! This crate provides an Axum HTTP server that exposes:
//!
//! - **Push channels** for overlays and dashboards: `WebSocket` (`/ws`)
//!   and Server-Sent Events (`/sse`). Both deliver `initialState` on
//!   connect followed by every state change, and both accept the same
//!   on-demand requests (`getState`, `getAllTimeStats`, `getUserHistory`)
//!   on the `WebSocket` side.
//! - **REST reads** for the same data (`/api/state`, `/api/stats`, ...)
//! - **Request submission** (`POST /api/requests`) through the ingestion
//!   adapter
//! - **Operator controls** (`/api/operator/*`) for the streamer
//! - **Minimal HTML status page** (`GET /`)
//!
//! # Architecture
//!
//! Every read is served from the [`BroadcastHub`](encore_core::BroadcastHub)'s
//! last published view, so a slow database never stalls an observer.
//! Every write is a command to the single-writer queue engine. A
//! background task broadcasts aggregate statistics on a fixed period.

pub mod connection;
pub mod error;
pub mod handlers;
pub mod operator;
pub mod router;
pub mod server;
pub mod sse;
pub mod startup;
pub mod state;
pub mod stats_task;
pub mod ws;

// Re-export primary types for convenience.
pub use error::ObserverError;
pub use router::build_router;
pub use server::{ServerConfig, ServerError, start_server};
pub use startup::{StartupError, spawn_observer};
pub use state::{AppState, ObserverOptions};
pub use stats_task::spawn_stats_broadcaster;
