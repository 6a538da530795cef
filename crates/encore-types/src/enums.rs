//! Enumeration types for the Encore request queue.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ---------------------------------------------------------------------------
// Request type
// ---------------------------------------------------------------------------

/// How a viewer paid for a song request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum RequestType {
    /// Request attached to a donation.
    Donation,
    /// Request redeemed with channel points.
    ChannelPoints,
}

impl RequestType {
    /// Priority a request of this type receives when no override is given.
    pub const fn default_priority(self) -> Priority {
        match self {
            Self::Donation => Priority::High,
            Self::ChannelPoints => Priority::Low,
        }
    }

    /// Stable lowercase name used in storage and logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Donation => "donation",
            Self::ChannelPoints => "channel_points",
        }
    }

    /// Parse the stable name produced by [`RequestType::as_str`].
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "donation" => Some(Self::Donation),
            "channel_points" => Some(Self::ChannelPoints),
            _ => None,
        }
    }
}

impl core::fmt::Display for RequestType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Ordering class of a queued request. Higher priorities play first.
///
/// The derived [`Ord`] follows declaration order, so `Low < Normal < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum Priority {
    /// Lowest class (channel-point redemptions by default).
    Low,
    /// Middle class, only reachable through an explicit override.
    Normal,
    /// Highest class (donations by default).
    High,
}

impl Priority {
    /// Numeric rank used for storage. Higher plays first.
    pub const fn rank(self) -> i16 {
        match self {
            Self::Low => 0,
            Self::Normal => 1,
            Self::High => 2,
        }
    }

    /// Inverse of [`Priority::rank`].
    pub const fn from_rank(rank: i16) -> Option<Self> {
        match rank {
            0 => Some(Self::Low),
            1 => Some(Self::Normal),
            2 => Some(Self::High),
            _ => None,
        }
    }
}
