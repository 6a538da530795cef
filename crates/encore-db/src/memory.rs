//! In-memory [`Repository`] used by tests and by the server when no
//! database URL is configured.
//!
//! Writes can be made to fail on demand so the engine's retry and
//! degraded-mode handling can be exercised without a real outage.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use encore_types::{HistoryEntry, QueuedRequest, RequestId, SongRequest};
use tokio::sync::Mutex;

use crate::error::DbError;
use crate::repository::{PersistedState, Repository, VideoMetadata};

/// Volatile repository backed by a [`Mutex`]-guarded [`PersistedState`].
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    state: Mutex<PersistedState>,
    metadata: Mutex<HashMap<String, VideoMetadata>>,
    failures_remaining: AtomicU32,
    unavailable: AtomicBool,
    writes: AtomicU64,
}

impl InMemoryRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a repository pre-populated with `state`.
    pub fn with_state(state: PersistedState) -> Self {
        Self {
            state: Mutex::new(state),
            ..Self::default()
        }
    }

    /// Make the next `count` writes fail with [`DbError::Unavailable`].
    pub fn fail_next_writes(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::Release);
    }

    /// Make every write fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Release);
    }

    /// Number of writes that succeeded.
    pub fn successful_writes(&self) -> u64 {
        self.writes.load(Ordering::Acquire)
    }

    /// Copy of the currently stored state.
    pub async fn stored(&self) -> PersistedState {
        self.state.lock().await.clone()
    }

    fn check_write(&self) -> Result<(), DbError> {
        if self.unavailable.load(Ordering::Acquire) {
            return Err(DbError::Unavailable(String::from("store marked unavailable")));
        }
        let injected = self
            .failures_remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(DbError::Unavailable(String::from("injected write failure")));
        }
        Ok(())
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::AcqRel);
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn load_state(&self) -> Result<PersistedState, DbError> {
        Ok(self.state.lock().await.clone())
    }

    async fn persist_queue_insert(&self, entry: &QueuedRequest) -> Result<(), DbError> {
        self.check_write()?;
        let mut state = self.state.lock().await;
        state.queue.retain(|q| q.request.id != entry.request.id);
        state.queue.push(entry.clone());
        drop(state);
        self.record_write();
        Ok(())
    }

    async fn persist_queue_remove(&self, id: RequestId) -> Result<(), DbError> {
        self.check_write()?;
        self.state.lock().await.queue.retain(|q| q.request.id != id);
        self.record_write();
        Ok(())
    }

    async fn persist_active_set(&self, request: &SongRequest) -> Result<(), DbError> {
        self.check_write()?;
        let mut state = self.state.lock().await;
        state.queue.retain(|q| q.request.id != request.id);
        state.active_song = Some(request.clone());
        drop(state);
        self.record_write();
        Ok(())
    }

    async fn persist_history_append(&self, entry: &HistoryEntry) -> Result<(), DbError> {
        self.check_write()?;
        let mut state = self.state.lock().await;
        if state
            .active_song
            .as_ref()
            .is_some_and(|active| active.id == entry.request.id)
        {
            state.active_song = None;
        }
        state.queue.retain(|q| q.request.id != entry.request.id);
        state.history.retain(|h| h.request.id != entry.request.id);
        state.history.push(entry.clone());
        drop(state);
        self.record_write();
        Ok(())
    }

    async fn persist_history_order(&self, order: &[RequestId]) -> Result<(), DbError> {
        self.check_write()?;
        let mut state = self.state.lock().await;
        let mut reordered = Vec::with_capacity(state.history.len());
        for id in order {
            if let Some(pos) = state.history.iter().position(|h| h.request.id == *id) {
                reordered.push(state.history.remove(pos));
            }
        }
        // Entries missing from `order` keep their relative order at the end.
        reordered.append(&mut state.history);
        state.history = reordered;
        drop(state);
        self.record_write();
        Ok(())
    }

    async fn persist_settings_change(
        &self,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<(), DbError> {
        self.check_write()?;
        self.state.lock().await.settings.set(key, value.clone());
        self.record_write();
        Ok(())
    }

    async fn persist_user_blocked(&self, login: &str, blocked: bool) -> Result<(), DbError> {
        self.check_write()?;
        let mut state = self.state.lock().await;
        if blocked {
            state.blocked_users.insert(login.to_lowercase());
        } else {
            state.blocked_users.remove(&login.to_lowercase());
        }
        drop(state);
        self.record_write();
        Ok(())
    }

    async fn cached_metadata(&self, video_id: &str) -> Result<Option<VideoMetadata>, DbError> {
        Ok(self.metadata.lock().await.get(video_id).cloned())
    }

    async fn cache_metadata(
        &self,
        video_id: &str,
        metadata: &VideoMetadata,
    ) -> Result<(), DbError> {
        self.check_write()?;
        self.metadata
            .lock()
            .await
            .insert(video_id.to_owned(), metadata.clone());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use encore_types::{Priority, RequestType, Requester};

    use super::*;

    fn request(title: &str) -> SongRequest {
        SongRequest {
            id: RequestId::new(),
            requester: Requester::new("Viewer", "viewer"),
            song_title: title.to_owned(),
            song_link: format!("https://youtu.be/{title}"),
            request_type: RequestType::ChannelPoints,
            priority: Priority::Low,
            submitted_at: Utc::now(),
            accepted_at: Utc::now(),
            duration_seconds: Some(200),
            thumbnail_url: None,
            channel_name: None,
        }
    }

    #[tokio::test]
    async fn request_moves_from_queue_to_active_to_history() {
        let repo = InMemoryRepository::new();
        let req = request("a");
        repo.persist_queue_insert(&QueuedRequest { request: req.clone(), sequence: 1 })
            .await
            .unwrap();
        assert_eq!(repo.stored().await.queue.len(), 1);

        repo.persist_active_set(&req).await.unwrap();
        let stored = repo.stored().await;
        assert!(stored.queue.is_empty());
        assert_eq!(stored.active_song.as_ref().map(|r| r.id), Some(req.id));

        repo.persist_history_append(&HistoryEntry { request: req.clone(), completed_at: Utc::now() })
            .await
            .unwrap();
        let stored = repo.stored().await;
        assert!(stored.active_song.is_none());
        assert_eq!(stored.history.len(), 1);
        assert_eq!(repo.successful_writes(), 3);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_one_per_write() {
        let repo = InMemoryRepository::new();
        repo.fail_next_writes(2);
        let entry = QueuedRequest { request: request("a"), sequence: 1 };
        assert!(repo.persist_queue_insert(&entry).await.is_err());
        assert!(repo.persist_queue_insert(&entry).await.is_err());
        assert!(repo.persist_queue_insert(&entry).await.is_ok());
        assert_eq!(repo.successful_writes(), 1);
    }

    #[tokio::test]
    async fn unavailable_store_rejects_every_write() {
        let repo = InMemoryRepository::new();
        repo.set_unavailable(true);
        assert!(repo.persist_settings_change("queue_enabled", &serde_json::json!(false)).await.is_err());
        repo.set_unavailable(false);
        assert!(repo.persist_settings_change("queue_enabled", &serde_json::json!(false)).await.is_ok());
        assert!(!repo.stored().await.settings.queue_enabled());
    }

    #[tokio::test]
    async fn history_order_is_rewritten() {
        let repo = InMemoryRepository::new();
        let a = request("a");
        let b = request("b");
        for r in [&a, &b] {
            repo.persist_history_append(&HistoryEntry { request: r.clone(), completed_at: Utc::now() })
                .await
                .unwrap();
        }
        repo.persist_history_order(&[b.id, a.id]).await.unwrap();
        let ids: Vec<_> = repo.stored().await.history.iter().map(|h| h.request.id).collect();
        assert_eq!(ids, vec![b.id, a.id]);
    }

    #[tokio::test]
    async fn blocklist_is_case_insensitive() {
        let repo = InMemoryRepository::new();
        repo.persist_user_blocked("SpamBot", true).await.unwrap();
        assert!(repo.stored().await.blocked_users.contains("spambot"));
        repo.persist_user_blocked("spambot", false).await.unwrap();
        assert!(repo.stored().await.blocked_users.is_empty());
    }
}
