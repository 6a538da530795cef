//! Per-connection plumbing shared by the push transports.

use std::sync::Arc;

use encore_core::{BroadcastHub, ObserverId, stats};
use encore_types::{ClientMessage, ServerMessage};

use crate::state::AppState;
use crate::stats_task::all_time_message;

/// Deregisters an observer when its transport goes away, however that
/// happens (clean close, error, or the response stream being dropped).
pub struct ObserverGuard {
    hub: Arc<BroadcastHub>,
    id: ObserverId,
}

impl ObserverGuard {
    /// Guard observer `id` registered on `hub`.
    pub const fn new(hub: Arc<BroadcastHub>, id: ObserverId) -> Self {
        Self { hub, id }
    }

    /// The guarded observer.
    pub const fn id(&self) -> ObserverId {
        self.id
    }
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        let hub = Arc::clone(&self.hub);
        let id = self.id;
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                hub.deregister(id).await;
            });
        }
    }
}

/// Answer one observer request. Replies are queued on the observer's own
/// channel, behind anything already published to it.
pub async fn answer(state: &AppState, id: ObserverId, request: ClientMessage) {
    let delivered = match request {
        ClientMessage::GetState => state.hub.resync(id).await,
        ClientMessage::GetAllTimeStats => {
            let view = state.hub.view().await;
            let reply = all_time_message(&view, state.options.top_requesters);
            state.hub.send_to(id, reply).await
        }
        ClientMessage::GetUserHistory(query) => {
            let view = state.hub.view().await;
            let page = stats::user_history_page(
                &view.history,
                &query.user_login,
                query.limit,
                query.offset,
            );
            state
                .hub
                .send_to(id, ServerMessage::UserHistoryData(page))
                .await
        }
    };
    if !delivered {
        tracing::debug!(observer = %id, "Reply dropped, observer gone");
    }
}
