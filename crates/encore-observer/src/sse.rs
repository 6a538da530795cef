//! Server-Sent Events fallback channel.
//!
//! `GET /sse` carries the same stream as the `WebSocket` (starting with
//! `initialState`) for clients that cannot upgrade. SSE is one-way, so
//! these clients make their requests over the REST endpoints.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::connection::ObserverGuard;
use crate::state::AppState;

/// Interval between SSE keep-alive comments.
const KEEP_ALIVE_SECS: u64 = 15;

/// Register an observer and stream its messages as SSE events.
///
/// Each event's name is the message's `event` tag; its data is the full
/// JSON envelope, identical to a `WebSocket` frame.
///
/// # Route
///
/// `GET /sse`
pub async fn sse_observer(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.hub.register().await;
    let guard = ObserverGuard::new(Arc::clone(&state.hub), subscription.id);
    debug!(observer = %guard.id(), "SSE observer connected");

    let events = stream::unfold(
        (subscription.receiver, guard),
        |(mut rx, guard): (mpsc::Receiver<_>, ObserverGuard)| async move {
            loop {
                let message = rx.recv().await?;
                match serde_json::to_string(&message) {
                    Ok(json) => {
                        let event = Event::default().event(message.event_name()).data(json);
                        return Some((Ok(event), (rx, guard)));
                    }
                    Err(e) => warn!("Failed to serialize {}: {e}", message.event_name()),
                }
            }
        },
    );

    Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(KEEP_ALIVE_SECS))
            .text("keep-alive"),
    )
}
