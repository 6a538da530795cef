//! Shared type definitions for the Encore song-request queue.
//!
//! This crate is the single source of truth for the data model and the
//! push-channel wire format. Types flow downstream to `TypeScript` via
//! `ts-rs` for the browser overlay.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers
//! - [`enums`] -- Request types and priorities
//! - [`structs`] -- Requests, history entries, settings, snapshots
//! - [`stats`] -- Aggregate statistics payloads
//! - [`messages`] -- Closed set of push-channel messages

pub mod enums;
pub mod ids;
pub mod messages;
pub mod stats;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{Priority, RequestType};
pub use ids::RequestId;
pub use messages::{ClientMessage, DEFAULT_USER_HISTORY_LIMIT, ServerMessage, UserHistoryQuery};
pub use stats::{
    AllTimeStats, DurationSummary, HistoryStats, RequesterStats, TodaysCount, TotalCounts,
    TypeCounts, UserHistoryPage,
};
pub use structs::{
    HistoryEntry, QUEUE_ENABLED, QueueSnapshot, QueuedRequest, Requester, Settings, SongRequest,
};

#[cfg(test)]
mod tests {
    //! `TypeScript` binding generation.

    #[test]
    fn export_bindings() {
        // ts-rs writes the files to the `bindings/` directory relative to
        // the crate root.
        use ts_rs::TS;

        let _ = crate::ids::RequestId::export_all();
        let _ = crate::enums::RequestType::export_all();
        let _ = crate::enums::Priority::export_all();
        let _ = crate::structs::Requester::export_all();
        let _ = crate::structs::SongRequest::export_all();
        let _ = crate::structs::HistoryEntry::export_all();
        let _ = crate::structs::Settings::export_all();
        let _ = crate::structs::QueueSnapshot::export_all();
        let _ = crate::stats::TotalCounts::export_all();
        let _ = crate::stats::TodaysCount::export_all();
        let _ = crate::stats::DurationSummary::export_all();
        let _ = crate::stats::TypeCounts::export_all();
        let _ = crate::stats::HistoryStats::export_all();
        let _ = crate::stats::RequesterStats::export_all();
        let _ = crate::stats::AllTimeStats::export_all();
        let _ = crate::stats::UserHistoryPage::export_all();
        let _ = crate::messages::ServerMessage::export_all();
        let _ = crate::messages::ClientMessage::export_all();
        let _ = crate::messages::UserHistoryQuery::export_all();
    }
}
