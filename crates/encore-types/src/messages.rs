//! Push-channel message types.
//!
//! The wire format is a closed, adjacently tagged set: every frame is a
//! JSON object `{"event": "<name>", "data": <payload>}`. Signal-only
//! events (`historyOrderChanged`) omit `data`.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::stats::{AllTimeStats, TodaysCount, TotalCounts, UserHistoryPage};
use crate::structs::{HistoryEntry, QueueSnapshot, Settings, SongRequest};

/// Default page size for `getUserHistory` when the client omits `limit`.
pub const DEFAULT_USER_HISTORY_LIMIT: u32 = 20;

/// Server-to-observer message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub enum ServerMessage {
    /// Full snapshot, sent once per connection right after registration.
    InitialState(Box<QueueSnapshot>),
    /// The full current queue.
    QueueUpdate(Vec<SongRequest>),
    /// The current active song, or `null`.
    ActiveSong(Option<SongRequest>),
    /// The windowed history.
    HistoryUpdate(Vec<HistoryEntry>),
    /// History was reordered; receivers should re-fetch.
    HistoryOrderChanged,
    /// Settings changed (carries pause state).
    SettingsUpdate(Settings),
    /// Queue and history sizes.
    TotalCountsUpdate(TotalCounts),
    /// Songs completed today.
    TodaysCountUpdate(TodaysCount),
    /// All-time statistics.
    AllTimeStatsUpdate(Box<AllTimeStats>),
    /// All-time statistics could not be computed.
    AllTimeStatsError {
        /// Human-readable reason.
        message: String,
    },
    /// Reply to `getUserHistory`.
    UserHistoryData(UserHistoryPage),
    /// Durable persistence entered or left degraded mode.
    Degraded {
        /// Whether writes are currently failing.
        active: bool,
        /// Last persistence failure, when active.
        message: Option<String>,
    },
}

impl ServerMessage {
    /// The wire name of this message's `event` tag.
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::InitialState(_) => "initialState",
            Self::QueueUpdate(_) => "queueUpdate",
            Self::ActiveSong(_) => "activeSong",
            Self::HistoryUpdate(_) => "historyUpdate",
            Self::HistoryOrderChanged => "historyOrderChanged",
            Self::SettingsUpdate(_) => "settingsUpdate",
            Self::TotalCountsUpdate(_) => "totalCountsUpdate",
            Self::TodaysCountUpdate(_) => "todaysCountUpdate",
            Self::AllTimeStatsUpdate(_) => "allTimeStatsUpdate",
            Self::AllTimeStatsError { .. } => "allTimeStatsError",
            Self::UserHistoryData(_) => "userHistoryData",
            Self::Degraded { .. } => "degraded",
        }
    }
}

/// Observer-to-server request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub enum ClientMessage {
    /// Ask for a fresh `initialState`.
    GetState,
    /// Ask for `allTimeStatsUpdate` (or `allTimeStatsError`).
    GetAllTimeStats,
    /// Ask for a page of one viewer's history.
    GetUserHistory(UserHistoryQuery),
}

/// Parameters of `getUserHistory`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct UserHistoryQuery {
    /// Login of the viewer (matched case-insensitively).
    pub user_login: String,
    /// Page size.
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Entries to skip.
    #[serde(default)]
    pub offset: u32,
}

const fn default_limit() -> u32 {
    DEFAULT_USER_HISTORY_LIMIT
}
