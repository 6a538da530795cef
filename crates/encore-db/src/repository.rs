//! The repository contract consumed by the queue engine.
//!
//! The engine writes through this interface before it broadcasts any
//! change, so a successful call must mean the write is durable. The
//! interface is pure data access: it enforces no ordering, duplicate,
//! or blocklist rules.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use encore_types::{HistoryEntry, QueuedRequest, RequestId, Settings, SongRequest};
use serde::{Deserialize, Serialize};

use crate::error::DbError;

/// Everything the engine needs to rebuild its in-memory state at startup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistedState {
    /// Queued requests, in any order (the engine re-sorts).
    pub queue: Vec<QueuedRequest>,
    /// The request that was playing when the process stopped.
    pub active_song: Option<SongRequest>,
    /// Completed requests in position order, oldest first.
    pub history: Vec<HistoryEntry>,
    /// Persisted settings.
    pub settings: Settings,
    /// Lowercase logins of blocked viewers.
    pub blocked_users: BTreeSet<String>,
}

/// Cached result of an external video-metadata lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoMetadata {
    /// Video title.
    pub title: String,
    /// Length in seconds, when the source reports it.
    pub duration_seconds: Option<u32>,
    /// Thumbnail image URL.
    pub thumbnail_url: Option<String>,
    /// Uploading channel name.
    pub channel_name: Option<String>,
    /// When the lookup was performed.
    pub fetched_at: DateTime<Utc>,
}

/// Durable storage behind the queue engine.
///
/// Every write must be durable when it returns `Ok`. Implementations must
/// be safe to call from the engine task while other tasks read the
/// metadata cache.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Load queue, active song, history, settings, and blocklist.
    async fn load_state(&self) -> Result<PersistedState, DbError>;

    /// Insert a request into the durable queue. Acts as an upsert so a
    /// re-prioritised request can be written again.
    async fn persist_queue_insert(&self, entry: &QueuedRequest) -> Result<(), DbError>;

    /// Delete a queued request that never became active.
    async fn persist_queue_remove(&self, id: RequestId) -> Result<(), DbError>;

    /// Record `request` as the active song, moving it out of the durable
    /// queue.
    async fn persist_active_set(&self, request: &SongRequest) -> Result<(), DbError>;

    /// Append a completed request to history, clearing it from the active
    /// slot.
    async fn persist_history_append(&self, entry: &HistoryEntry) -> Result<(), DbError>;

    /// Rewrite history positions to match `order` (oldest first).
    async fn persist_history_order(&self, order: &[RequestId]) -> Result<(), DbError>;

    /// Store a single setting.
    async fn persist_settings_change(
        &self,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<(), DbError>;

    /// Block or unblock a viewer by lowercase login.
    async fn persist_user_blocked(&self, login: &str, blocked: bool) -> Result<(), DbError>;

    /// Look up cached metadata for a video id.
    async fn cached_metadata(&self, video_id: &str) -> Result<Option<VideoMetadata>, DbError>;

    /// Store metadata for a video id, replacing any previous entry.
    async fn cache_metadata(&self, video_id: &str, metadata: &VideoMetadata)
    -> Result<(), DbError>;
}
