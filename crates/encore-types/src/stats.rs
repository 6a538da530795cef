//! Aggregate statistics payloads pushed to observers.
//!
//! These are derived values; nothing in the system owns or mutates them
//! directly. See `encore_core::stats` for how they are computed.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::structs::HistoryEntry;

/// Current sizes of the queue and history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct TotalCounts {
    /// Requests waiting in the queue.
    pub queue: u64,
    /// Completed requests.
    pub history: u64,
}

/// Number of songs completed during the streamer's current calendar day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct TodaysCount {
    /// Completed songs today.
    pub count: u64,
}

/// Total and average play time over entries with a resolved duration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct DurationSummary {
    /// Sum of resolved durations, in seconds.
    pub total_seconds: u64,
    /// `total_seconds` as `H:MM:SS` (or `M:SS` under an hour).
    pub total_formatted: String,
    /// Mean resolved duration, in seconds (rounded down).
    pub average_seconds: u64,
    /// `average_seconds` formatted like `total_formatted`.
    pub average_formatted: String,
    /// How many entries contributed a duration.
    pub counted: u64,
}

/// Per-type request counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct TypeCounts {
    /// Donation requests.
    pub donation: u64,
    /// Channel-point requests.
    pub channel_points: u64,
}

/// Counts and durations over a set of history entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct HistoryStats {
    /// Number of entries, including those without a duration.
    pub total_songs: u64,
    /// Duration math over entries with a resolved duration.
    pub duration: DurationSummary,
    /// Breakdown by request type.
    pub by_type: TypeCounts,
}

/// All-time aggregate for a single requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct RequesterStats {
    /// Lowercase login.
    pub login: String,
    /// Most recently seen display name.
    pub display_name: String,
    /// Completed requests by this viewer.
    pub song_count: u64,
    /// Sum of resolved durations, in seconds.
    pub total_duration_seconds: u64,
}

/// All-time statistics over the whole history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct AllTimeStats {
    /// Counts and durations over every history entry.
    pub history: HistoryStats,
    /// Number of distinct requesters in history.
    pub unique_requesters: u64,
    /// Requesters ordered by song count, descending.
    pub top_requesters: Vec<RequesterStats>,
}

/// One page of a single viewer's history.
///
/// Pagination contract: `offset + history.len()` is the next offset; an
/// empty `history` signals the end of the data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct UserHistoryPage {
    /// Entries in this page, newest first.
    pub history: Vec<HistoryEntry>,
    /// Total entries for this viewer.
    pub total: u64,
    /// Offset this page starts at.
    pub offset: u64,
}
