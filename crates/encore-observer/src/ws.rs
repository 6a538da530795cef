//! `WebSocket` push channel.
//!
//! Clients connect to `GET /ws`. The first frame is always
//! `initialState`; after that every frame is an incremental event or a
//! reply to one of the client's own requests, in the order the hub
//! queued them. There is no replay: a reconnecting client starts over
//! from a fresh `initialState`.
//!
//! If the hub drops this observer for falling behind, its channel closes
//! and the socket is closed so the client reconnects and resyncs.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use encore_types::ClientMessage;
use tracing::{debug, warn};

use crate::connection::{ObserverGuard, answer};
use crate::state::AppState;

/// Upgrade an HTTP request to a `WebSocket` observer connection.
///
/// # Route
///
/// `GET /ws`
pub async fn ws_observer(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_ws(socket, state))
}

/// Register with the hub, then pump hub messages out and client
/// requests in until either side goes away.
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
    let subscription = state.hub.register().await;
    let guard = ObserverGuard::new(Arc::clone(&state.hub), subscription.id);
    let mut rx = subscription.receiver;
    debug!(observer = %guard.id(), "WebSocket observer connected");

    loop {
        tokio::select! {
            outgoing = rx.recv() => {
                let Some(message) = outgoing else {
                    debug!(observer = %guard.id(), "Observer dropped by hub, closing socket");
                    let _ = socket.send(Message::Close(None)).await;
                    return;
                };
                let json = match serde_json::to_string(&message) {
                    Ok(j) => j,
                    Err(e) => {
                        warn!("Failed to serialize {}: {e}", message.event_name());
                        continue;
                    }
                };
                if socket.send(Message::Text(json.into())).await.is_err() {
                    debug!(observer = %guard.id(), "WebSocket observer disconnected (send failed)");
                    return;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(text.as_str()) {
                            Ok(request) => answer(&state, guard.id(), request).await,
                            Err(e) => debug!(observer = %guard.id(), "Ignoring malformed client message: {e}"),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            debug!(observer = %guard.id(), "WebSocket observer disconnected (pong failed)");
                            return;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(observer = %guard.id(), "WebSocket observer disconnected");
                        return;
                    }
                    Some(Err(e)) => {
                        debug!(observer = %guard.id(), "WebSocket error: {e}");
                        return;
                    }
                    Some(Ok(_)) => {
                        // Binary and pong frames carry nothing for us.
                    }
                }
            }
        }
    }
}
