//! Statistics aggregator.
//!
//! Pure functions over history. Entries whose duration never resolved
//! count toward song totals but are left out of duration sums and
//! averages.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, Local, TimeZone, Utc};
use encore_types::{
    AllTimeStats, DurationSummary, HistoryEntry, HistoryStats, RequestType, RequesterStats,
    TodaysCount, TypeCounts, UserHistoryPage,
};

/// Aggregation overflowed a counter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("statistics overflowed while summing {0}")]
pub struct StatsError(&'static str);

/// Which calendar defines "today".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsClock {
    /// The server's local timezone.
    Local,
    /// A fixed offset from UTC.
    Fixed(FixedOffset),
}

impl StatsClock {
    /// Pick a fixed offset when configured, else local time.
    pub fn from_offset(offset: Option<FixedOffset>) -> Self {
        offset.map_or(Self::Local, Self::Fixed)
    }

    /// Songs completed on the calendar day containing `now`.
    pub fn todays_count(self, history: &[HistoryEntry], now: DateTime<Utc>) -> TodaysCount {
        match self {
            Self::Local => todays_count(history, &now.with_timezone(&Local)),
            Self::Fixed(offset) => todays_count(history, &now.with_timezone(&offset)),
        }
    }
}

/// Format seconds as `M:SS`, or `H:MM:SS` from one hour up.
pub fn format_duration(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

/// Total and average over the durations that are known.
///
/// # Errors
///
/// Returns [`StatsError`] if the total does not fit in a `u64`.
pub fn summarize_durations<I>(durations: I) -> Result<DurationSummary, StatsError>
where
    I: IntoIterator<Item = Option<u32>>,
{
    let mut total: u64 = 0;
    let mut counted: u64 = 0;
    for seconds in durations.into_iter().flatten() {
        total = total
            .checked_add(u64::from(seconds))
            .ok_or(StatsError("durations"))?;
        counted = counted.saturating_add(1);
    }
    let average = total.checked_div(counted).unwrap_or(0);
    Ok(DurationSummary {
        total_seconds: total,
        total_formatted: format_duration(total),
        average_seconds: average,
        average_formatted: format_duration(average),
        counted,
    })
}

/// Song count, duration summary, and per-type counts.
///
/// # Errors
///
/// Returns [`StatsError`] if the duration total overflows.
pub fn history_stats(history: &[HistoryEntry]) -> Result<HistoryStats, StatsError> {
    let mut by_type = TypeCounts::default();
    for entry in history {
        match entry.request.request_type {
            RequestType::Donation => by_type.donation = by_type.donation.saturating_add(1),
            RequestType::ChannelPoints => {
                by_type.channel_points = by_type.channel_points.saturating_add(1);
            }
        }
    }
    Ok(HistoryStats {
        total_songs: len_u64(history.len()),
        duration: summarize_durations(history.iter().map(|h| h.request.duration_seconds))?,
        by_type,
    })
}

/// Songs whose completion falls on the same local calendar day as `now`.
pub fn todays_count<Tz: TimeZone>(history: &[HistoryEntry], now: &DateTime<Tz>) -> TodaysCount {
    let tz = now.timezone();
    let today = now.date_naive();
    let count = history
        .iter()
        .filter(|h| h.completed_at.with_timezone(&tz).date_naive() == today)
        .count();
    TodaysCount {
        count: len_u64(count),
    }
}

/// History-wide stats plus the `top` requesters by songs played.
///
/// Requesters tie-break on total duration, then login. The display name
/// is the one from each requester's most recent entry.
///
/// # Errors
///
/// Returns [`StatsError`] if any duration total overflows.
pub fn all_time_stats(history: &[HistoryEntry], top: usize) -> Result<AllTimeStats, StatsError> {
    let mut per_user: HashMap<&str, RequesterStats> = HashMap::new();
    for entry in history {
        let requester = &entry.request.requester;
        let stats = per_user
            .entry(requester.login.as_str())
            .or_insert_with(|| RequesterStats {
                login: requester.login.clone(),
                display_name: requester.display_name.clone(),
                song_count: 0,
                total_duration_seconds: 0,
            });
        stats.display_name.clone_from(&requester.display_name);
        stats.song_count = stats.song_count.saturating_add(1);
        if let Some(seconds) = entry.request.duration_seconds {
            stats.total_duration_seconds = stats
                .total_duration_seconds
                .checked_add(u64::from(seconds))
                .ok_or(StatsError("requester durations"))?;
        }
    }

    let unique_requesters = len_u64(per_user.len());
    let mut ranked: Vec<RequesterStats> = per_user.into_values().collect();
    ranked.sort_by(|a, b| {
        b.song_count
            .cmp(&a.song_count)
            .then_with(|| b.total_duration_seconds.cmp(&a.total_duration_seconds))
            .then_with(|| a.login.cmp(&b.login))
    });
    ranked.truncate(top);

    Ok(AllTimeStats {
        history: history_stats(history)?,
        unique_requesters,
        top_requesters: ranked,
    })
}

/// One page of a viewer's history, newest first.
///
/// `login` matches case-insensitively. An empty page past the end tells
/// the client it has everything.
pub fn user_history_page(
    history: &[HistoryEntry],
    login: &str,
    limit: u32,
    offset: u32,
) -> UserHistoryPage {
    let login = login.trim().to_lowercase();
    let mine: Vec<&HistoryEntry> = history
        .iter()
        .rev()
        .filter(|h| h.request.requester.login == login)
        .collect();
    let total = len_u64(mine.len());
    let page = mine
        .into_iter()
        .skip(usize::try_from(offset).unwrap_or(usize::MAX))
        .take(usize::try_from(limit).unwrap_or(usize::MAX))
        .cloned()
        .collect();
    UserHistoryPage {
        history: page,
        total,
        offset: u64::from(offset),
    }
}

fn len_u64(len: usize) -> u64 {
    u64::try_from(len).unwrap_or(u64::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::arithmetic_side_effects)]
mod tests {
    use chrono::Duration;
    use encore_types::{RequestId, Requester, SongRequest};

    use super::*;

    fn entry(
        login: &str,
        request_type: RequestType,
        duration: Option<u32>,
        completed_at: DateTime<Utc>,
    ) -> HistoryEntry {
        HistoryEntry {
            request: SongRequest {
                id: RequestId::new(),
                requester: Requester::new(login.to_uppercase(), login),
                song_title: String::from("Song"),
                song_link: String::from("https://youtu.be/x"),
                request_type,
                priority: request_type.default_priority(),
                submitted_at: completed_at,
                accepted_at: completed_at,
                duration_seconds: duration,
                thumbnail_url: None,
                channel_name: None,
            },
            completed_at,
        }
    }

    #[test]
    fn durations_format_with_and_without_hours() {
        assert_eq!(format_duration(0), "0:00");
        assert_eq!(format_duration(59), "0:59");
        assert_eq!(format_duration(125), "2:05");
        assert_eq!(format_duration(3600), "1:00:00");
        assert_eq!(format_duration(3723), "1:02:03");
    }

    #[test]
    fn unknown_durations_count_as_songs_but_not_time() {
        let now = Utc::now();
        let history = vec![
            entry("a", RequestType::Donation, Some(200), now),
            entry("b", RequestType::ChannelPoints, None, now),
            entry("c", RequestType::ChannelPoints, Some(100), now),
        ];
        let stats = history_stats(&history).unwrap();
        assert_eq!(stats.total_songs, 3);
        assert_eq!(stats.duration.counted, 2);
        assert_eq!(stats.duration.total_seconds, 300);
        assert_eq!(stats.duration.average_seconds, 150);
        assert_eq!(stats.duration.average_formatted, "2:30");
        assert_eq!(stats.by_type.donation, 1);
        assert_eq!(stats.by_type.channel_points, 2);
    }

    #[test]
    fn empty_history_has_zero_average() {
        let stats = history_stats(&[]).unwrap();
        assert_eq!(stats.duration.average_seconds, 0);
        assert_eq!(stats.duration.total_formatted, "0:00");
    }

    #[test]
    fn today_follows_the_configured_offset() {
        // 23:30 UTC on the 1st is already the 2nd at UTC+2.
        let late = Utc.with_ymd_and_hms(2026, 3, 1, 23, 30, 0).unwrap();
        let history = vec![
            entry("a", RequestType::Donation, None, late),
            entry("b", RequestType::Donation, None, late - Duration::hours(2)),
        ];
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 23, 45, 0).unwrap();

        let utc = StatsClock::Fixed(FixedOffset::east_opt(0).unwrap());
        assert_eq!(utc.todays_count(&history, now).count, 2);

        let plus_two = StatsClock::Fixed(FixedOffset::east_opt(2 * 3600).unwrap());
        assert_eq!(plus_two.todays_count(&history, now).count, 1);
    }

    #[test]
    fn top_requesters_rank_by_count_then_duration() {
        let now = Utc::now();
        let history = vec![
            entry("a", RequestType::Donation, Some(100), now),
            entry("b", RequestType::Donation, Some(100), now),
            entry("b", RequestType::Donation, None, now),
            entry("c", RequestType::Donation, Some(500), now),
            entry("d", RequestType::Donation, Some(50), now),
        ];
        let stats = all_time_stats(&history, 3).unwrap();
        assert_eq!(stats.unique_requesters, 4);
        let logins: Vec<&str> = stats.top_requesters.iter().map(|r| r.login.as_str()).collect();
        assert_eq!(logins, vec!["b", "c", "a"]);
        assert_eq!(stats.top_requesters[0].song_count, 2);
        assert_eq!(stats.top_requesters[0].display_name, "B");
    }

    #[test]
    fn user_history_pages_newest_first() {
        let start = Utc::now();
        let history: Vec<HistoryEntry> = (0..5)
            .map(|i| {
                let login = if i % 2 == 0 { "alice" } else { "bob" };
                entry(login, RequestType::Donation, None, start + Duration::minutes(i))
            })
            .collect();

        let first = user_history_page(&history, "ALICE", 2, 0);
        assert_eq!(first.total, 3);
        assert_eq!(first.history.len(), 2);
        assert_eq!(first.history[0].completed_at, start + Duration::minutes(4));

        let second = user_history_page(&history, "alice", 2, 2);
        assert_eq!(second.history.len(), 1);
        assert_eq!(second.offset, 2);

        let done = user_history_page(&history, "alice", 2, 3);
        assert!(done.history.is_empty());
    }
}
