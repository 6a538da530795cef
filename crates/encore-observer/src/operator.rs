//! Operator REST API handlers for running the show.
//!
//! These endpoints are the streamer's (or a moderator's) controls. Every
//! one of them is a single command to the queue engine, so each takes
//! effect atomically and is visible to observers through the usual push
//! messages.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/operator/advance` | Finish the active song and start the next |
//! | `POST` | `/api/operator/finish` | Finish the active song if it matches `id` |
//! | `POST` | `/api/operator/remove` | Drop a queued request |
//! | `POST` | `/api/operator/reprioritize` | Move a queued request to another class |
//! | `POST` | `/api/operator/reorder-history` | Replace the history order |
//! | `POST` | `/api/operator/settings` | Set one setting |
//! | `POST` | `/api/operator/block` | Block or unblock a requester |

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use encore_types::{Priority, RequestId};

use crate::error::ObserverError;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Request body naming one request.
#[derive(Debug, serde::Deserialize)]
pub struct RequestRef {
    /// Target request.
    pub id: RequestId,
}

/// Request body for `POST /api/operator/reprioritize`.
#[derive(Debug, serde::Deserialize)]
pub struct ReprioritizeBody {
    /// Target request.
    pub id: RequestId,
    /// New priority class.
    pub priority: Priority,
}

/// Request body for `POST /api/operator/reorder-history`.
#[derive(Debug, serde::Deserialize)]
pub struct ReorderHistoryBody {
    /// Every history id, oldest first.
    pub order: Vec<RequestId>,
}

/// Request body for `POST /api/operator/settings`.
#[derive(Debug, serde::Deserialize)]
pub struct SetSettingBody {
    /// Setting name, e.g. `queue_enabled`.
    pub key: String,
    /// New value.
    pub value: serde_json::Value,
}

/// Request body for `POST /api/operator/block`.
#[derive(Debug, serde::Deserialize)]
pub struct BlockUserBody {
    /// Requester login.
    pub login: String,
    /// `true` to block, `false` to unblock.
    pub blocked: bool,
}

/// Generic success response.
#[derive(Debug, serde::Serialize)]
struct OperatorResponse {
    /// Whether the operation succeeded.
    ok: bool,
    /// Human-readable message.
    message: String,
}

impl OperatorResponse {
    fn ok(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            ok: true,
            message: message.into(),
        })
    }
}

// ---------------------------------------------------------------------------
// POST /api/operator/advance
// ---------------------------------------------------------------------------

/// Move the active song to history and activate the queue head.
///
/// With an empty queue the active song is simply cleared; the response
/// then carries `"active": null`.
pub async fn advance(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ObserverError> {
    let next = state.engine.advance().await?;
    let message = next.as_ref().map_or_else(
        || String::from("Queue empty, nothing playing"),
        |song| format!("Now playing '{}'", song.song_title),
    );
    Ok(Json(serde_json::json!({
        "ok": true,
        "message": message,
        "active": next,
    })))
}

// ---------------------------------------------------------------------------
// POST /api/operator/finish
// ---------------------------------------------------------------------------

/// Finish the active song without starting another.
///
/// A stale id (the song already moved on) is not an error; the response
/// reports `"finished": false`.
pub async fn finish(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RequestRef>,
) -> Result<impl IntoResponse, ObserverError> {
    let finished = state.engine.finish_active(body.id).await?;
    let message = if finished {
        "Song finished"
    } else {
        "Song was not active"
    };
    Ok(Json(serde_json::json!({
        "ok": true,
        "finished": finished,
        "message": message,
    })))
}

// ---------------------------------------------------------------------------
// POST /api/operator/remove
// ---------------------------------------------------------------------------

/// Remove a request from the queue.
pub async fn remove(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RequestRef>,
) -> Result<impl IntoResponse, ObserverError> {
    state.engine.remove_from_queue(body.id).await?;
    Ok(OperatorResponse::ok(format!(
        "Request {} removed",
        body.id.into_inner()
    )))
}

// ---------------------------------------------------------------------------
// POST /api/operator/reprioritize
// ---------------------------------------------------------------------------

/// Change the priority class of a queued request.
pub async fn reprioritize(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ReprioritizeBody>,
) -> Result<impl IntoResponse, ObserverError> {
    state.engine.reprioritize(body.id, body.priority).await?;
    Ok(OperatorResponse::ok(format!(
        "Request {} is now {:?}",
        body.id.into_inner(),
        body.priority
    )))
}

// ---------------------------------------------------------------------------
// POST /api/operator/reorder-history
// ---------------------------------------------------------------------------

/// Replace the order of the played history.
pub async fn reorder_history(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ReorderHistoryBody>,
) -> Result<impl IntoResponse, ObserverError> {
    let count = body.order.len();
    state.engine.reorder_history(body.order).await?;
    Ok(OperatorResponse::ok(format!("History reordered ({count} entries)")))
}

// ---------------------------------------------------------------------------
// POST /api/operator/settings
// ---------------------------------------------------------------------------

/// Set one setting, e.g. `{"key": "queue_enabled", "value": false}`.
pub async fn set_setting(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SetSettingBody>,
) -> Result<impl IntoResponse, ObserverError> {
    let message = format!("Setting '{}' updated", body.key);
    state.engine.set_setting(body.key, body.value).await?;
    Ok(OperatorResponse::ok(message))
}

// ---------------------------------------------------------------------------
// POST /api/operator/block
// ---------------------------------------------------------------------------

/// Block or unblock a requester.
pub async fn block_user(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BlockUserBody>,
) -> Result<impl IntoResponse, ObserverError> {
    state
        .engine
        .set_user_blocked(&body.login, body.blocked)
        .await?;
    let verb = if body.blocked { "blocked" } else { "unblocked" };
    Ok(OperatorResponse::ok(format!("{} {verb}", body.login)))
}
