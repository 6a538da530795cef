//! Axum router construction for the Observer API.
//!
//! Assembles all routes (REST, `WebSocket`, SSE) into a single [`Router`]
//! with CORS middleware enabled for browser overlays served from other
//! origins.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::{handlers, operator, sse, ws};

/// Build the complete Axum router for the Observer server.
///
/// The router includes:
/// - `GET /` -- minimal HTML status page
/// - `GET /ws` -- `WebSocket` observer channel
/// - `GET /sse` -- Server-Sent Events observer channel
/// - `GET /api/state` -- full queue snapshot
/// - `GET /api/stats`, `/api/stats/today`, `/api/stats/totals`
/// - `GET /api/users/{login}/history` -- paged per-viewer history
/// - `POST /api/requests` -- submit a song request
/// - `POST /api/operator/*` -- streamer controls
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Status page
        .route("/", get(handlers::index))
        // Push channels
        .route("/ws", get(ws::ws_observer))
        .route("/sse", get(sse::sse_observer))
        // Reads
        .route("/api/state", get(handlers::get_state))
        .route("/api/stats", get(handlers::get_all_time_stats))
        .route("/api/stats/today", get(handlers::get_todays_count))
        .route("/api/stats/totals", get(handlers::get_total_counts))
        .route("/api/users/{login}/history", get(handlers::get_user_history))
        // Submission
        .route("/api/requests", post(handlers::submit_request))
        // Operator controls
        .route("/api/operator/advance", post(operator::advance))
        .route("/api/operator/finish", post(operator::finish))
        .route("/api/operator/remove", post(operator::remove))
        .route("/api/operator/reprioritize", post(operator::reprioritize))
        .route("/api/operator/reorder-history", post(operator::reorder_history))
        .route("/api/operator/settings", post(operator::set_setting))
        .route("/api/operator/block", post(operator::block_user))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
