//! Aggregate statistics: on-demand replies and the periodic broadcast.

use std::sync::Arc;

use chrono::Utc;
use encore_core::{StateView, stats};
use encore_types::ServerMessage;
use tokio::task::JoinHandle;

use crate::state::AppState;

/// `allTimeStatsUpdate`, or `allTimeStatsError` if aggregation failed.
pub fn all_time_message(view: &StateView, top: usize) -> ServerMessage {
    match stats::all_time_stats(&view.history, top) {
        Ok(all_time) => ServerMessage::AllTimeStatsUpdate(Box::new(all_time)),
        Err(e) => {
            tracing::warn!(error = %e, "All-time statistics failed");
            ServerMessage::AllTimeStatsError {
                message: e.to_string(),
            }
        }
    }
}

/// Push totals, today's count, and all-time stats to every observer.
pub async fn broadcast_stats(state: &AppState) {
    let view = state.hub.view().await;
    let totals = ServerMessage::TotalCountsUpdate(view.total_counts());
    let today = ServerMessage::TodaysCountUpdate(
        state
            .options
            .stats_clock
            .todays_count(&view.history, Utc::now()),
    );
    let all_time = all_time_message(&view, state.options.top_requesters);

    for message in [totals, today, all_time] {
        state.hub.broadcast(&message).await;
    }
}

/// Run [`broadcast_stats`] every `stats_interval` until aborted.
pub fn spawn_stats_broadcaster(state: Arc<AppState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(state.options.stats_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            broadcast_stats(&state).await;
            tracing::trace!("Statistics broadcast");
        }
    })
}
