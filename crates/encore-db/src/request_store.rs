//! `PostgreSQL` implementation of the [`Repository`] contract.
//!
//! All requests live in one `requests` table; the `state` column
//! (`queued`, `active`, `history`) says where a request currently is, so a
//! request can never be in two places at once on disk either. Every write
//! that touches more than one row runs in a transaction.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use encore_types::{
    HistoryEntry, Priority, QueuedRequest, RequestId, RequestType, Requester, Settings,
    SongRequest,
};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::DbError;
use crate::repository::{PersistedState, Repository, VideoMetadata};

/// Columns selected whenever a full request row is read.
const REQUEST_COLUMNS: &str = "id, requester_login, requester_display, song_title, song_link, \
     request_type, priority, submitted_at, accepted_at, duration_seconds, thumbnail_url, \
     channel_name, sequence, completed_at";

/// Durable repository backed by a `PostgreSQL` pool.
#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    /// Create a repository bound to a connection pool.
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_requests(&self, state: &str, order_by: &str) -> Result<Vec<RequestRow>, DbError> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM requests WHERE state = $1 ORDER BY {order_by}"
        );
        let rows = sqlx::query_as::<_, RequestRow>(&sql)
            .bind(state)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

/// Keep the most recently accepted active row; any others are treated as
/// finished, the same way `persist_active_set` closes them out.
fn split_active(rows: Vec<RequestRow>) -> (Option<RequestRow>, Vec<RequestRow>) {
    let mut rows = rows.into_iter();
    let active = rows.next();
    let stray: Vec<RequestRow> = rows.collect();
    if !stray.is_empty() {
        tracing::warn!(
            count = stray.len(),
            "Found more than one active request, moving extras to history"
        );
    }
    (active, stray)
}

/// Insert or refresh the requester's `users` row.
async fn upsert_user(
    tx: &mut Transaction<'_, Postgres>,
    requester: &Requester,
) -> Result<(), DbError> {
    sqlx::query(
        r"INSERT INTO users (login, display_name) VALUES ($1, $2)
          ON CONFLICT (login) DO UPDATE SET display_name = EXCLUDED.display_name",
    )
    .bind(&requester.login)
    .bind(&requester.display_name)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Upsert a request row with the given state. `sequence` is only written
/// on insert or when `Some`.
async fn upsert_request(
    tx: &mut Transaction<'_, Postgres>,
    request: &SongRequest,
    sequence: Option<u64>,
    state: &str,
) -> Result<(), DbError> {
    let sequence_i64 = sequence.map(|s| i64::try_from(s).unwrap_or(i64::MAX));
    sqlx::query(
        r"INSERT INTO requests
          (id, requester_login, requester_display, song_title, song_link, request_type,
           priority, submitted_at, accepted_at, duration_seconds, thumbnail_url, channel_name,
           sequence, state)
          VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, COALESCE($13, 0), $14)
          ON CONFLICT (id) DO UPDATE SET
            priority = EXCLUDED.priority,
            duration_seconds = EXCLUDED.duration_seconds,
            sequence = COALESCE($13, requests.sequence),
            state = EXCLUDED.state",
    )
    .bind(request.id.into_inner())
    .bind(&request.requester.login)
    .bind(&request.requester.display_name)
    .bind(&request.song_title)
    .bind(&request.song_link)
    .bind(request.request_type.as_str())
    .bind(request.priority.rank())
    .bind(request.submitted_at)
    .bind(request.accepted_at)
    .bind(request.duration_seconds.map(|d| i32::try_from(d).unwrap_or(i32::MAX)))
    .bind(&request.thumbnail_url)
    .bind(&request.channel_name)
    .bind(sequence_i64)
    .bind(state)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl Repository for PgRepository {
    async fn load_state(&self) -> Result<PersistedState, DbError> {
        let queue = self
            .fetch_requests("queued", "priority DESC, submitted_at, sequence")
            .await?
            .into_iter()
            .map(RequestRow::into_queued)
            .collect::<Result<Vec<_>, _>>()?;

        let (active_row, stray_active) =
            split_active(self.fetch_requests("active", "accepted_at DESC").await?);
        let active_song = active_row.map(RequestRow::into_request).transpose()?;

        let history = self
            .fetch_requests("history", "history_position, completed_at")
            .await?
            .into_iter()
            .chain(stray_active)
            .map(RequestRow::into_history)
            .collect::<Result<Vec<_>, _>>()?;

        let setting_rows: Vec<(String, serde_json::Value)> =
            sqlx::query_as("SELECT key, value FROM settings")
                .fetch_all(&self.pool)
                .await?;
        let mut settings = Settings::default();
        for (key, value) in setting_rows {
            settings.set(&key, value);
        }

        let blocked_users: BTreeSet<String> =
            sqlx::query_scalar("SELECT login FROM users WHERE blocked")
                .fetch_all(&self.pool)
                .await?
                .into_iter()
                .collect();

        tracing::info!(
            queued = queue.len(),
            history = history.len(),
            active = active_song.is_some(),
            "Loaded persisted queue state"
        );

        Ok(PersistedState {
            queue,
            active_song,
            history,
            settings,
            blocked_users,
        })
    }

    async fn persist_queue_insert(&self, entry: &QueuedRequest) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        upsert_user(&mut tx, &entry.request.requester).await?;
        upsert_request(&mut tx, &entry.request, Some(entry.sequence), "queued").await?;
        tx.commit().await?;
        tracing::debug!(request_id = %entry.request.id, "Persisted queue insert");
        Ok(())
    }

    async fn persist_queue_remove(&self, id: RequestId) -> Result<(), DbError> {
        sqlx::query("DELETE FROM requests WHERE id = $1 AND state = 'queued'")
            .bind(id.into_inner())
            .execute(&self.pool)
            .await?;
        tracing::debug!(request_id = %id, "Persisted queue removal");
        Ok(())
    }

    async fn persist_active_set(&self, request: &SongRequest) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        // A previous active row whose history write was lost while degraded
        // is closed out so the single-active index holds.
        sqlx::query(
            r"UPDATE requests SET
                state = 'history',
                completed_at = COALESCE(completed_at, now()),
                history_position = (SELECT COALESCE(MAX(history_position), 0) + 1
                                    FROM requests WHERE state = 'history')
              WHERE state = 'active' AND id <> $1",
        )
        .bind(request.id.into_inner())
        .execute(&mut *tx)
        .await?;
        upsert_user(&mut tx, &request.requester).await?;
        upsert_request(&mut tx, request, None, "active").await?;
        tx.commit().await?;
        tracing::debug!(request_id = %request.id, "Persisted active song");
        Ok(())
    }

    async fn persist_history_append(&self, entry: &HistoryEntry) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        upsert_user(&mut tx, &entry.request.requester).await?;
        upsert_request(&mut tx, &entry.request, None, "history").await?;
        sqlx::query(
            r"UPDATE requests SET
                completed_at = $2,
                history_position = (SELECT COALESCE(MAX(history_position), 0) + 1
                                    FROM requests WHERE state = 'history')
              WHERE id = $1",
        )
        .bind(entry.request.id.into_inner())
        .bind(entry.completed_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        tracing::debug!(request_id = %entry.request.id, "Persisted history append");
        Ok(())
    }

    async fn persist_history_order(&self, order: &[RequestId]) -> Result<(), DbError> {
        let ids: Vec<Uuid> = order.iter().map(|id| id.into_inner()).collect();
        let positions: Vec<i64> = (1_i64..).take(ids.len()).collect();

        // Single UPDATE joined against UNNEST instead of one statement per row.
        sqlx::query(
            r"UPDATE requests AS r SET history_position = o.pos
              FROM UNNEST($1::UUID[], $2::BIGINT[]) AS o(id, pos)
              WHERE r.id = o.id AND r.state = 'history'",
        )
        .bind(&ids)
        .bind(&positions)
        .execute(&self.pool)
        .await?;
        tracing::debug!(count = ids.len(), "Persisted history order");
        Ok(())
    }

    async fn persist_settings_change(
        &self,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<(), DbError> {
        sqlx::query(
            r"INSERT INTO settings (key, value) VALUES ($1, $2)
              ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        tracing::debug!(key, "Persisted setting");
        Ok(())
    }

    async fn persist_user_blocked(&self, login: &str, blocked: bool) -> Result<(), DbError> {
        let login = login.to_lowercase();
        sqlx::query(
            r"INSERT INTO users (login, display_name, blocked) VALUES ($1, $1, $2)
              ON CONFLICT (login) DO UPDATE SET blocked = EXCLUDED.blocked",
        )
        .bind(&login)
        .bind(blocked)
        .execute(&self.pool)
        .await?;
        tracing::debug!(login, blocked, "Persisted blocklist change");
        Ok(())
    }

    async fn cached_metadata(&self, video_id: &str) -> Result<Option<VideoMetadata>, DbError> {
        let row = sqlx::query_as::<_, MetadataRow>(
            r"SELECT title, duration_seconds, thumbnail_url, channel_name, fetched_at
              FROM video_metadata_cache WHERE video_id = $1",
        )
        .bind(video_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(MetadataRow::into_metadata))
    }

    async fn cache_metadata(
        &self,
        video_id: &str,
        metadata: &VideoMetadata,
    ) -> Result<(), DbError> {
        sqlx::query(
            r"INSERT INTO video_metadata_cache
              (video_id, title, duration_seconds, thumbnail_url, channel_name, fetched_at)
              VALUES ($1, $2, $3, $4, $5, $6)
              ON CONFLICT (video_id) DO UPDATE SET
                title = EXCLUDED.title,
                duration_seconds = EXCLUDED.duration_seconds,
                thumbnail_url = EXCLUDED.thumbnail_url,
                channel_name = EXCLUDED.channel_name,
                fetched_at = EXCLUDED.fetched_at",
        )
        .bind(video_id)
        .bind(&metadata.title)
        .bind(metadata.duration_seconds.map(|d| i32::try_from(d).unwrap_or(i32::MAX)))
        .bind(&metadata.thumbnail_url)
        .bind(&metadata.channel_name)
        .bind(metadata.fetched_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// =========================================================================
// Row types
// =========================================================================

/// A row from the `requests` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RequestRow {
    /// Request ID.
    pub id: Uuid,
    /// Lowercase login of the requester.
    pub requester_login: String,
    /// Display name at submission time.
    pub requester_display: String,
    /// Video title.
    pub song_title: String,
    /// Video link.
    pub song_link: String,
    /// `donation` or `channel_points`.
    pub request_type: String,
    /// Priority rank (0-2).
    pub priority: i16,
    /// Submission timestamp.
    pub submitted_at: DateTime<Utc>,
    /// When the engine accepted the request.
    pub accepted_at: DateTime<Utc>,
    /// Resolved duration.
    pub duration_seconds: Option<i32>,
    /// Thumbnail URL.
    pub thumbnail_url: Option<String>,
    /// Channel name.
    pub channel_name: Option<String>,
    /// Engine insertion sequence.
    pub sequence: i64,
    /// Completion time for history rows.
    pub completed_at: Option<DateTime<Utc>>,
}

impl RequestRow {
    fn into_request(self) -> Result<SongRequest, DbError> {
        let request_type = RequestType::parse(&self.request_type).ok_or_else(|| {
            DbError::Corrupt(format!("unknown request type '{}'", self.request_type))
        })?;
        let priority = Priority::from_rank(self.priority)
            .ok_or_else(|| DbError::Corrupt(format!("unknown priority rank {}", self.priority)))?;
        let duration_seconds = self
            .duration_seconds
            .map(u32::try_from)
            .transpose()
            .map_err(|e| DbError::Corrupt(format!("negative duration: {e}")))?;

        Ok(SongRequest {
            id: RequestId::from(self.id),
            requester: Requester {
                display_name: self.requester_display,
                login: self.requester_login,
            },
            song_title: self.song_title,
            song_link: self.song_link,
            request_type,
            priority,
            submitted_at: self.submitted_at,
            accepted_at: self.accepted_at,
            duration_seconds,
            thumbnail_url: self.thumbnail_url,
            channel_name: self.channel_name,
        })
    }

    fn into_queued(self) -> Result<QueuedRequest, DbError> {
        let sequence = u64::try_from(self.sequence).unwrap_or(0);
        Ok(QueuedRequest {
            request: self.into_request()?,
            sequence,
        })
    }

    fn into_history(self) -> Result<HistoryEntry, DbError> {
        let completed_at = self.completed_at.unwrap_or(self.submitted_at);
        Ok(HistoryEntry {
            request: self.into_request()?,
            completed_at,
        })
    }
}

/// A row from the `video_metadata_cache` table.
#[derive(Debug, Clone, sqlx::FromRow)]
struct MetadataRow {
    title: String,
    duration_seconds: Option<i32>,
    thumbnail_url: Option<String>,
    channel_name: Option<String>,
    fetched_at: DateTime<Utc>,
}

impl MetadataRow {
    fn into_metadata(self) -> VideoMetadata {
        VideoMetadata {
            title: self.title,
            duration_seconds: self.duration_seconds.and_then(|d| u32::try_from(d).ok()),
            thumbnail_url: self.thumbnail_url,
            channel_name: self.channel_name,
            fetched_at: self.fetched_at,
        }
    }
}
