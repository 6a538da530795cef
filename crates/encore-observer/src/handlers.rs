//! REST API endpoint handlers for the Observer server.
//!
//! Reads are served from the hub's last published view and never touch
//! the database. `POST /api/requests` is the HTTP face of the ingestion
//! adapter.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/` | Minimal HTML status page |
//! | `GET` | `/api/state` | Full snapshot (same as `initialState`) |
//! | `GET` | `/api/stats` | All-time statistics |
//! | `GET` | `/api/stats/today` | Songs completed today |
//! | `GET` | `/api/stats/totals` | Queue and history sizes |
//! | `GET` | `/api/users/{login}/history` | One viewer's history, paged |
//! | `POST` | `/api/requests` | Submit a song request |

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use chrono::Utc;
use encore_core::stats;
use encore_ingest::SubmissionForm;
use encore_types::DEFAULT_USER_HISTORY_LIMIT;

use crate::error::ObserverError;
use crate::state::AppState;

/// Largest page `GET /api/users/{login}/history` will return.
const MAX_USER_HISTORY_LIMIT: u32 = 200;

// ---------------------------------------------------------------------------
// Query parameter structs
// ---------------------------------------------------------------------------

/// Query parameters for `GET /api/users/{login}/history`.
#[derive(Debug, serde::Deserialize)]
pub struct HistoryPageQuery {
    /// Page size (default 20, max 200).
    pub limit: Option<u32>,
    /// Entries to skip (default 0).
    pub offset: Option<u32>,
}

// ---------------------------------------------------------------------------
// GET / -- minimal HTML status page
// ---------------------------------------------------------------------------

/// Serve a minimal HTML page showing queue status and API links.
#[allow(clippy::too_many_lines)]
pub async fn index(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let view = state.hub.view().await;
    let queued = view.queue.len();
    let completed = view.history.len();
    let observers = state.hub.observer_count().await;
    let now_playing = view
        .active_song
        .as_ref()
        .map_or_else(|| String::from("(nothing)"), |s| escape_html(&s.song_title));
    let (status_class, status_text) = if view.degraded.is_some() {
        ("degraded", "DEGRADED")
    } else {
        ("status", "RUNNING")
    };
    let queue_state = if view.settings.queue_enabled() { "open" } else { "closed" };

    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <title>Encore</title>
    <style>
        body {{
            background: #0d1117;
            color: #c9d1d9;
            font-family: 'Cascadia Code', 'Fira Code', 'Consolas', monospace;
            padding: 2rem;
            max-width: 800px;
            margin: 0 auto;
        }}
        h1 {{ color: #58a6ff; margin-bottom: 0.25rem; }}
        .subtitle {{ color: #8b949e; margin-top: 0; }}
        .metric {{
            display: inline-block;
            background: #161b22;
            border: 1px solid #30363d;
            border-radius: 6px;
            padding: 1rem 1.5rem;
            margin: 0.5rem 0.5rem 0.5rem 0;
            min-width: 120px;
        }}
        .metric .label {{ color: #8b949e; font-size: 0.85rem; }}
        .metric .value {{ color: #58a6ff; font-size: 1.5rem; font-weight: bold; }}
        a {{ color: #58a6ff; text-decoration: none; }}
        ul {{ list-style: none; padding: 0; }}
        li {{ padding: 0.3rem 0; }}
        .status {{ color: #3fb950; font-weight: bold; }}
        .degraded {{ color: #f85149; font-weight: bold; }}
        hr {{ border: none; border-top: 1px solid #30363d; margin: 1.5rem 0; }}
    </style>
</head>
<body>
    <h1>Encore</h1>
    <p class="subtitle">Live song request queue</p>

    <p>Status: <span class="{status_class}">{status_text}</span> &middot; queue {queue_state}</p>
    <p>Now playing: {now_playing}</p>

    <div>
        <div class="metric">
            <div class="label">Queued</div>
            <div class="value">{queued}</div>
        </div>
        <div class="metric">
            <div class="label">Played</div>
            <div class="value">{completed}</div>
        </div>
        <div class="metric">
            <div class="label">Observers</div>
            <div class="value">{observers}</div>
        </div>
    </div>

    <hr>

    <h2>API Endpoints</h2>
    <ul>
        <li>GET <a href="/api/state">/api/state</a> -- Queue, active song, history, settings</li>
        <li>GET <a href="/api/stats">/api/stats</a> -- All-time statistics</li>
        <li>GET <a href="/api/stats/today">/api/stats/today</a> -- Songs played today</li>
        <li>GET <a href="/api/stats/totals">/api/stats/totals</a> -- Queue and history sizes</li>
        <li>GET /api/users/{{login}}/history -- One viewer's history (?limit=N&amp;offset=M)</li>
        <li>POST /api/requests -- Submit a song request</li>
        <li>POST /api/operator/{{advance,finish,remove,reprioritize,reorder-history,settings,block}}</li>
    </ul>

    <h2>Push channels</h2>
    <ul>
        <li><code>ws://host:port/ws</code> -- WebSocket</li>
        <li><code>http://host:port/sse</code> -- Server-Sent Events fallback</li>
    </ul>
</body>
</html>"#
    ))
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

// ---------------------------------------------------------------------------
// GET /api/state
// ---------------------------------------------------------------------------

/// Return the same snapshot a new observer receives as `initialState`.
pub async fn get_state(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.hub.snapshot().await)
}

// ---------------------------------------------------------------------------
// GET /api/stats, /api/stats/today, /api/stats/totals
// ---------------------------------------------------------------------------

/// Return all-time statistics.
pub async fn get_all_time_stats(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ObserverError> {
    let view = state.hub.view().await;
    let all_time = stats::all_time_stats(&view.history, state.options.top_requesters)
        .map_err(|e| ObserverError::Internal(e.to_string()))?;
    Ok(Json(all_time))
}

/// Return the number of songs completed today.
pub async fn get_todays_count(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let view = state.hub.view().await;
    Json(
        state
            .options
            .stats_clock
            .todays_count(&view.history, Utc::now()),
    )
}

/// Return queue and history sizes.
pub async fn get_total_counts(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.hub.view().await.total_counts())
}

// ---------------------------------------------------------------------------
// GET /api/users/{login}/history
// ---------------------------------------------------------------------------

/// Return one viewer's history, newest first.
///
/// `offset + history.len()` is the next offset; an empty page means the
/// end was reached.
pub async fn get_user_history(
    State(state): State<Arc<AppState>>,
    Path(login): Path<String>,
    Query(query): Query<HistoryPageQuery>,
) -> Result<impl IntoResponse, ObserverError> {
    let limit = query.limit.unwrap_or(DEFAULT_USER_HISTORY_LIMIT);
    if limit == 0 || limit > MAX_USER_HISTORY_LIMIT {
        return Err(ObserverError::InvalidRequest(format!(
            "limit must be between 1 and {MAX_USER_HISTORY_LIMIT}"
        )));
    }
    let view = state.hub.view().await;
    let page = stats::user_history_page(&view.history, &login, limit, query.offset.unwrap_or(0));
    Ok(Json(page))
}

// ---------------------------------------------------------------------------
// POST /api/requests
// ---------------------------------------------------------------------------

/// Submit a song request through the ingestion adapter.
///
/// Responds `201` with the accepted request, or `400`/`409`/`502` with
/// the reason it was refused.
pub async fn submit_request(
    State(state): State<Arc<AppState>>,
    Json(form): Json<SubmissionForm>,
) -> Result<impl IntoResponse, ObserverError> {
    let accepted = state.ingest.submit(form).await?;
    Ok((StatusCode::CREATED, Json(accepted)))
}
