//! Broadcast hub: the registry of connected observers.
//!
//! The hub holds the last state the engine published alongside the
//! observer set, under one lock. Registration reads the snapshot and
//! inserts the observer in the same critical section that publishing
//! uses, so a new observer's `initialState` always precedes any
//! incremental event it receives.
//!
//! Each observer gets a bounded channel. Delivery never waits: a full or
//! closed channel removes that observer and nobody else notices.

use std::collections::HashMap;
use std::sync::Arc;

use encore_types::{HistoryEntry, QueueSnapshot, ServerMessage, Settings, SongRequest, TotalCounts};
use tokio::sync::{Mutex, mpsc};

use crate::state::EngineEvent;

/// Identifies one registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl core::fmt::Display for ObserverId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "obs-{}", self.0)
    }
}

/// A registered observer's end of the push channel.
#[derive(Debug)]
pub struct Subscription {
    /// The hub-assigned id, needed to deregister or address replies.
    pub id: ObserverId,
    /// Messages in publish order, starting with `initialState`.
    pub receiver: mpsc::Receiver<ServerMessage>,
}

/// The state last published by the engine.
///
/// Every read path (snapshots, stats, user history) is served from here,
/// so readers never wait on an in-flight database write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateView {
    /// Queue in play order.
    pub queue: Vec<SongRequest>,
    /// Active song.
    pub active_song: Option<SongRequest>,
    /// Full history, oldest first.
    pub history: Vec<HistoryEntry>,
    /// Settings.
    pub settings: Settings,
    /// Last persistence failure while degraded.
    pub degraded: Option<String>,
}

impl StateView {
    /// The most recent `window` history entries, oldest first.
    pub fn windowed_history(&self, window: usize) -> Vec<HistoryEntry> {
        let start = self.history.len().saturating_sub(window);
        self.history
            .get(start..)
            .map_or_else(Vec::new, <[HistoryEntry]>::to_vec)
    }

    /// Wire snapshot with history trimmed to `window`.
    pub fn snapshot(&self, window: usize) -> QueueSnapshot {
        QueueSnapshot {
            queue: self.queue.clone(),
            active_song: self.active_song.clone(),
            history: self.windowed_history(window),
            settings: self.settings.clone(),
            degraded: self.degraded.is_some(),
        }
    }

    /// Queue and history sizes.
    pub fn total_counts(&self) -> TotalCounts {
        TotalCounts {
            queue: u64::try_from(self.queue.len()).unwrap_or(u64::MAX),
            history: u64::try_from(self.history.len()).unwrap_or(u64::MAX),
        }
    }
}

struct HubInner {
    view: Arc<StateView>,
    observers: HashMap<ObserverId, mpsc::Sender<ServerMessage>>,
    next_id: u64,
}

/// Fan-out point between the engine and every connected observer.
pub struct BroadcastHub {
    inner: Mutex<HubInner>,
    buffer_size: usize,
    history_window: usize,
}

impl BroadcastHub {
    /// Create a hub with `buffer_size` messages of slack per observer and
    /// `history_window` entries of history in snapshots.
    pub fn new(buffer_size: usize, history_window: usize) -> Self {
        Self {
            inner: Mutex::new(HubInner {
                view: Arc::new(StateView::default()),
                observers: HashMap::new(),
                next_id: 0,
            }),
            buffer_size: buffer_size.max(1),
            history_window,
        }
    }

    /// History entries included in snapshots.
    pub const fn history_window(&self) -> usize {
        self.history_window
    }

    /// Register an observer and queue its `initialState`.
    pub async fn register(&self) -> Subscription {
        let mut inner = self.inner.lock().await;
        let id = ObserverId(inner.next_id);
        inner.next_id = inner.next_id.wrapping_add(1);

        let (tx, receiver) = mpsc::channel(self.buffer_size);
        let initial = ServerMessage::InitialState(Box::new(inner.view.snapshot(self.history_window)));
        // A fresh channel always has room for its first message.
        if tx.try_send(initial).is_ok() {
            inner.observers.insert(id, tx);
        }
        tracing::debug!(observer = %id, observers = inner.observers.len(), "Observer registered");
        Subscription { id, receiver }
    }

    /// Forget an observer. Its pending messages are discarded with the
    /// channel; a reconnect starts from a fresh snapshot.
    pub async fn deregister(&self, id: ObserverId) -> bool {
        let mut inner = self.inner.lock().await;
        let removed = inner.observers.remove(&id).is_some();
        if removed {
            tracing::debug!(observer = %id, observers = inner.observers.len(), "Observer deregistered");
        }
        removed
    }

    /// Drop every observer. Their channels close, which ends their
    /// transports; used at shutdown so open connections do not hold the
    /// server open.
    pub async fn disconnect_all(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let count = inner.observers.len();
        inner.observers.clear();
        tracing::info!(observers = count, "All observers disconnected");
        count
    }

    /// Replace the published state and push one message per event.
    pub async fn publish(&self, view: StateView, events: &[EngineEvent]) {
        let mut inner = self.inner.lock().await;
        let HubInner {
            view: current,
            observers,
            ..
        } = &mut *inner;
        *current = Arc::new(view);
        for event in events {
            let message = message_for(event, current, self.history_window);
            fan_out(observers, &message);
        }
    }

    /// Push a message that is not tied to a state change (statistics).
    pub async fn broadcast(&self, message: &ServerMessage) {
        let mut inner = self.inner.lock().await;
        fan_out(&mut inner.observers, message);
    }

    /// Push a message to one observer. Returns `false` if the observer is
    /// gone or was dropped for being too slow.
    pub async fn send_to(&self, id: ObserverId, message: ServerMessage) -> bool {
        let mut inner = self.inner.lock().await;
        deliver(&mut inner.observers, id, message)
    }

    /// Push a fresh `initialState` to one observer, ordered with the
    /// event stream.
    pub async fn resync(&self, id: ObserverId) -> bool {
        let mut inner = self.inner.lock().await;
        let snapshot = ServerMessage::InitialState(Box::new(inner.view.snapshot(self.history_window)));
        deliver(&mut inner.observers, id, snapshot)
    }

    /// The last published state.
    pub async fn view(&self) -> Arc<StateView> {
        Arc::clone(&self.inner.lock().await.view)
    }

    /// Point-in-time snapshot of the last published state.
    pub async fn snapshot(&self) -> QueueSnapshot {
        self.view().await.snapshot(self.history_window)
    }

    /// Number of registered observers.
    pub async fn observer_count(&self) -> usize {
        self.inner.lock().await.observers.len()
    }
}

fn message_for(event: &EngineEvent, view: &StateView, window: usize) -> ServerMessage {
    match event {
        EngineEvent::QueueChanged => ServerMessage::QueueUpdate(view.queue.clone()),
        EngineEvent::ActiveSongChanged(song) => ServerMessage::ActiveSong(song.clone()),
        EngineEvent::HistoryChanged => ServerMessage::HistoryUpdate(view.windowed_history(window)),
        EngineEvent::HistoryOrderChanged => ServerMessage::HistoryOrderChanged,
        EngineEvent::SettingsChanged => ServerMessage::SettingsUpdate(view.settings.clone()),
        EngineEvent::Degraded { active, message } => ServerMessage::Degraded {
            active: *active,
            message: message.clone(),
        },
    }
}

fn fan_out(observers: &mut HashMap<ObserverId, mpsc::Sender<ServerMessage>>, message: &ServerMessage) {
    observers.retain(|id, tx| match tx.try_send(message.clone()) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::warn!(observer = %id, event = message.event_name(), "Observer buffer full, dropping observer");
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            tracing::debug!(observer = %id, "Observer channel closed");
            false
        }
    });
}

fn deliver(
    observers: &mut HashMap<ObserverId, mpsc::Sender<ServerMessage>>,
    id: ObserverId,
    message: ServerMessage,
) -> bool {
    let Some(tx) = observers.get(&id) else {
        return false;
    };
    match tx.try_send(message) {
        Ok(()) => true,
        Err(e) => {
            let full = matches!(e, mpsc::error::TrySendError::Full(_));
            tracing::debug!(observer = %id, full, "Direct reply undeliverable, dropping observer");
            observers.remove(&id);
            false
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use chrono::Utc;
    use encore_types::{Priority, RequestId, RequestType, Requester};

    use super::*;

    fn song(title: &str) -> SongRequest {
        SongRequest {
            id: RequestId::new(),
            requester: Requester::new("Viewer", "viewer"),
            song_title: title.to_owned(),
            song_link: format!("https://youtu.be/{title}"),
            request_type: RequestType::Donation,
            priority: Priority::High,
            submitted_at: Utc::now(),
            accepted_at: Utc::now(),
            duration_seconds: Some(200),
            thumbnail_url: None,
            channel_name: None,
        }
    }

    fn view_with_queue(titles: &[&str]) -> StateView {
        StateView {
            queue: titles.iter().map(|t| song(t)).collect(),
            ..StateView::default()
        }
    }

    #[tokio::test]
    async fn initial_state_precedes_events() {
        let hub = BroadcastHub::new(8, 50);
        hub.publish(view_with_queue(&["a"]), &[EngineEvent::QueueChanged]).await;

        let mut sub = hub.register().await;
        hub.publish(view_with_queue(&["a", "b"]), &[EngineEvent::QueueChanged]).await;

        match sub.receiver.recv().await.unwrap() {
            ServerMessage::InitialState(snapshot) => assert_eq!(snapshot.queue.len(), 1),
            other => panic!("expected initialState, got {}", other.event_name()),
        }
        match sub.receiver.recv().await.unwrap() {
            ServerMessage::QueueUpdate(queue) => assert_eq!(queue.len(), 2),
            other => panic!("expected queueUpdate, got {}", other.event_name()),
        }
    }

    #[tokio::test]
    async fn slow_observer_is_dropped_alone() {
        let hub = BroadcastHub::new(2, 50);
        let mut fast = hub.register().await;
        let _slow = hub.register().await;

        for i in 0..4 {
            let titles: Vec<String> = (0..=i).map(|n| n.to_string()).collect();
            let refs: Vec<&str> = titles.iter().map(String::as_str).collect();
            hub.publish(view_with_queue(&refs), &[EngineEvent::QueueChanged]).await;
            // Drain the fast observer as we go.
            while fast.receiver.try_recv().is_ok() {}
        }

        assert_eq!(hub.observer_count().await, 1);
    }

    #[tokio::test]
    async fn reconnect_gets_fresh_snapshot_without_replay() {
        let hub = BroadcastHub::new(8, 50);
        let first = hub.register().await;
        assert!(hub.deregister(first.id).await);
        drop(first);

        hub.publish(view_with_queue(&["a"]), &[EngineEvent::QueueChanged]).await;
        hub.publish(view_with_queue(&["a", "b"]), &[EngineEvent::QueueChanged]).await;

        let mut second = hub.register().await;
        match second.receiver.recv().await.unwrap() {
            ServerMessage::InitialState(snapshot) => {
                assert_eq!(*snapshot, hub.snapshot().await);
            }
            other => panic!("expected initialState, got {}", other.event_name()),
        }
        assert!(second.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn snapshot_windows_history() {
        let hub = BroadcastHub::new(8, 2);
        let history = ["a", "b", "c"]
            .iter()
            .map(|t| HistoryEntry {
                request: song(t),
                completed_at: Utc::now(),
            })
            .collect();
        hub.publish(
            StateView {
                history,
                ..StateView::default()
            },
            &[],
        )
        .await;

        let snapshot = hub.snapshot().await;
        let titles: Vec<&str> = snapshot
            .history
            .iter()
            .map(|h| h.request.song_title.as_str())
            .collect();
        assert_eq!(titles, vec!["b", "c"]);
        assert_eq!(hub.view().await.total_counts().history, 3);
    }

    #[tokio::test]
    async fn direct_reply_reaches_only_its_observer() {
        let hub = BroadcastHub::new(8, 50);
        let mut a = hub.register().await;
        let mut b = hub.register().await;
        let _ = a.receiver.recv().await;
        let _ = b.receiver.recv().await;

        assert!(hub.resync(a.id).await);
        assert!(matches!(
            a.receiver.recv().await,
            Some(ServerMessage::InitialState(_))
        ));
        assert!(b.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn active_song_event_carries_its_own_value() {
        let hub = BroadcastHub::new(8, 50);
        let mut sub = hub.register().await;
        let _ = sub.receiver.recv().await;

        let current = song("now");
        let view = StateView {
            active_song: Some(current.clone()),
            ..StateView::default()
        };
        hub.publish(
            view,
            &[
                EngineEvent::ActiveSongChanged(None),
                EngineEvent::ActiveSongChanged(Some(current.clone())),
            ],
        )
        .await;

        assert_eq!(sub.receiver.recv().await, Some(ServerMessage::ActiveSong(None)));
        assert_eq!(
            sub.receiver.recv().await,
            Some(ServerMessage::ActiveSong(Some(current)))
        );
    }

    #[tokio::test]
    async fn disconnect_all_closes_every_channel() {
        let hub = BroadcastHub::new(8, 50);
        let mut a = hub.register().await;
        let mut b = hub.register().await;

        assert_eq!(hub.disconnect_all().await, 2);
        assert_eq!(hub.observer_count().await, 0);

        // Initial snapshots are still readable, then the channels end.
        assert!(a.receiver.recv().await.is_some());
        assert!(a.receiver.recv().await.is_none());
        assert!(b.receiver.recv().await.is_some());
        assert!(b.receiver.recv().await.is_none());
    }
}
