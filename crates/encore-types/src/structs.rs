//! Core entity structs: requesters, requests, history entries, settings,
//! and the point-in-time queue snapshot.
//!
//! Wire-facing structs serialize with camelCase field names to match the
//! overlay's JavaScript conventions.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{Priority, RequestType};
use crate::ids::RequestId;

/// Settings key controlling whether new submissions are accepted.
pub const QUEUE_ENABLED: &str = "queue_enabled";

// ---------------------------------------------------------------------------
// Requester
// ---------------------------------------------------------------------------

/// The viewer who submitted a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct Requester {
    /// Display name as shown in chat.
    pub display_name: String,
    /// Lowercase login used for case-insensitive matching.
    pub login: String,
}

impl Requester {
    /// Build a requester, normalising the login to lowercase.
    pub fn new(display_name: impl Into<String>, login: &str) -> Self {
        Self {
            display_name: display_name.into(),
            login: login.trim().to_lowercase(),
        }
    }
}

// ---------------------------------------------------------------------------
// Song request
// ---------------------------------------------------------------------------

/// A single song request as it moves from queue to active slot to history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct SongRequest {
    /// Engine-assigned identifier.
    pub id: RequestId,
    /// Who asked for the song.
    pub requester: Requester,
    /// Title of the video.
    pub song_title: String,
    /// Canonical link to the video.
    pub song_link: String,
    /// How the request was paid for.
    #[serde(rename = "type")]
    pub request_type: RequestType,
    /// Ordering class (derived from type unless overridden).
    pub priority: Priority,
    /// When the viewer redeemed. Never later than `accepted_at`.
    pub submitted_at: DateTime<Utc>,
    /// When the engine accepted the request, from the engine's clock.
    pub accepted_at: DateTime<Utc>,
    /// Length of the video, if metadata resolved it.
    pub duration_seconds: Option<u32>,
    /// Thumbnail image URL.
    pub thumbnail_url: Option<String>,
    /// Name of the channel that uploaded the video.
    pub channel_name: Option<String>,
}

/// A request waiting in the queue, with the engine's insertion sequence.
///
/// The sequence number is the final tiebreak when priority and
/// `submitted_at` are equal. It is assigned monotonically at submit time
/// and persisted so restarts keep the same order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedRequest {
    /// The request itself.
    pub request: SongRequest,
    /// Monotonic insertion sequence.
    pub sequence: u64,
}

impl QueuedRequest {
    /// Total order of the queue: priority descending, then submission time
    /// ascending, then insertion sequence ascending.
    pub fn queue_order(&self, other: &Self) -> core::cmp::Ordering {
        other
            .request
            .priority
            .cmp(&self.request.priority)
            .then_with(|| self.request.submitted_at.cmp(&other.request.submitted_at))
            .then_with(|| self.sequence.cmp(&other.sequence))
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// A completed request. Terminal: never re-enters the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct HistoryEntry {
    /// The request, with its duration frozen at completion.
    #[serde(flatten)]
    pub request: SongRequest,
    /// When the song finished.
    pub completed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Process-wide key/value configuration mutated by operator actions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Settings(pub BTreeMap<String, serde_json::Value>);

impl Settings {
    /// Whether the queue currently accepts submissions. Defaults to `true`
    /// when the key is absent or not a boolean.
    pub fn queue_enabled(&self) -> bool {
        self.0
            .get(QUEUE_ENABLED)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(true)
    }

    /// Look up a raw setting value.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    /// Set a value, returning the previous one.
    pub fn set(&mut self, key: &str, value: serde_json::Value) -> Option<serde_json::Value> {
        self.0.insert(key.to_owned(), value)
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Point-in-time, internally consistent view of the queue state.
///
/// Sent as the payload of `initialState` and returned by `GET /api/state`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct QueueSnapshot {
    /// Queue in play order.
    pub queue: Vec<SongRequest>,
    /// Currently playing request, if any.
    pub active_song: Option<SongRequest>,
    /// Most recent history entries, oldest first.
    pub history: Vec<HistoryEntry>,
    /// Current settings.
    pub settings: Settings,
    /// Whether durable persistence is currently failing.
    pub degraded: bool,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn request(priority: Priority, second: u32) -> SongRequest {
        SongRequest {
            id: RequestId::new(),
            requester: Requester::new("Viewer", "Viewer"),
            song_title: String::from("Song"),
            song_link: String::from("https://youtu.be/abc"),
            request_type: RequestType::Donation,
            priority,
            submitted_at: Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, second).unwrap(),
            accepted_at: Utc.with_ymd_and_hms(2026, 1, 1, 12, 1, 0).unwrap(),
            duration_seconds: None,
            thumbnail_url: None,
            channel_name: None,
        }
    }

    #[test]
    fn requester_login_is_lowercased() {
        let r = Requester::new("CoolViewer", "  CoolViewer ");
        assert_eq!(r.login, "coolviewer");
        assert_eq!(r.display_name, "CoolViewer");
    }

    #[test]
    fn queue_order_prefers_priority_then_time_then_sequence() {
        let high_late = QueuedRequest { request: request(Priority::High, 30), sequence: 2 };
        let low_early = QueuedRequest { request: request(Priority::Low, 0), sequence: 1 };
        assert_eq!(high_late.queue_order(&low_early), core::cmp::Ordering::Less);

        let a = QueuedRequest { request: request(Priority::Low, 5), sequence: 9 };
        let b = QueuedRequest { request: request(Priority::Low, 5), sequence: 3 };
        assert_eq!(b.queue_order(&a), core::cmp::Ordering::Less);
    }

    #[test]
    fn queue_enabled_defaults_to_true() {
        let mut settings = Settings::default();
        assert!(settings.queue_enabled());
        settings.set(QUEUE_ENABLED, serde_json::Value::Bool(false));
        assert!(!settings.queue_enabled());
        settings.set(QUEUE_ENABLED, serde_json::json!("nonsense"));
        assert!(settings.queue_enabled());
    }

    #[test]
    fn history_entry_flattens_request_fields() {
        let entry = HistoryEntry {
            request: request(Priority::High, 0),
            completed_at: Utc::now(),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("songTitle").is_some());
        assert!(json.get("completedAt").is_some());
        assert_eq!(json["type"], "donation");
    }
}
