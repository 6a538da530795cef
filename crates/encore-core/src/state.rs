//! Authoritative queue state and its transition rules.
//!
//! [`QueueState`] is plain data with synchronous operations. Each
//! successful mutation returns a [`Change`]: the durable write that must
//! land before anyone is told, and the events to emit once it has. The
//! engine task owns the only instance and applies changes one at a time.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use encore_db::PersistedState;
use encore_types::{
    HistoryEntry, Priority, QUEUE_ENABLED, QueuedRequest, RequestId, RequestType, Requester,
    Settings, SongRequest,
};

use crate::error::{PolicyRejection, QueueError};
use crate::policy::{PolicyContext, SubmissionPolicy};

/// A candidate request as handed to `submit`, before the engine assigns
/// an id and a sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRequest {
    /// Who asked.
    pub requester: Requester,
    /// Display title.
    pub song_title: String,
    /// Canonical link to the song.
    pub song_link: String,
    /// Donation or channel points.
    pub request_type: RequestType,
    /// Explicit priority. `None` derives it from the request type.
    pub priority: Option<Priority>,
    /// When the viewer redeemed. `None` means "now" at acceptance; a
    /// time after acceptance is capped to it.
    pub submitted_at: Option<DateTime<Utc>>,
    /// Song length, if resolved.
    pub duration_seconds: Option<u32>,
    /// Thumbnail, if resolved.
    pub thumbnail_url: Option<String>,
    /// Uploader, if resolved.
    pub channel_name: Option<String>,
}

impl NewRequest {
    /// A candidate with no metadata and derived priority.
    pub fn new(
        requester: Requester,
        song_title: impl Into<String>,
        song_link: impl Into<String>,
        request_type: RequestType,
    ) -> Self {
        Self {
            requester,
            song_title: song_title.into(),
            song_link: song_link.into(),
            request_type,
            priority: None,
            submitted_at: None,
            duration_seconds: None,
            thumbnail_url: None,
            channel_name: None,
        }
    }

    /// Override the derived priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Pin the submission timestamp.
    #[must_use]
    pub const fn submitted_at(mut self, at: DateTime<Utc>) -> Self {
        self.submitted_at = Some(at);
        self
    }

    /// Attach a resolved duration.
    #[must_use]
    pub const fn with_duration(mut self, seconds: Option<u32>) -> Self {
        self.duration_seconds = seconds;
        self
    }

    /// The priority this request will be queued with.
    pub fn effective_priority(&self) -> Priority {
        self.priority
            .unwrap_or_else(|| self.request_type.default_priority())
    }

    fn validate(&self) -> Result<(), QueueError> {
        if self.requester.login.is_empty() {
            return Err(QueueError::Validation(String::from("requester login is empty")));
        }
        if self.song_title.trim().is_empty() {
            return Err(QueueError::Validation(String::from("song title is empty")));
        }
        if self.song_link.trim().is_empty() {
            return Err(QueueError::Validation(String::from("song link is empty")));
        }
        Ok(())
    }

    fn into_request(self, id: RequestId, accepted_at: DateTime<Utc>) -> SongRequest {
        let submitted_at = self
            .submitted_at
            .map_or(accepted_at, |at| at.min(accepted_at));
        let priority = self.effective_priority();
        SongRequest {
            id,
            requester: self.requester,
            song_title: self.song_title.trim().to_owned(),
            song_link: self.song_link.trim().to_owned(),
            request_type: self.request_type,
            priority,
            submitted_at,
            accepted_at,
            duration_seconds: self.duration_seconds,
            thumbnail_url: self.thumbnail_url,
            channel_name: self.channel_name,
        }
    }
}

/// Something observers should hear about, emitted only after the
/// corresponding write completed (or the engine degraded).
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The queue's contents or order changed.
    QueueChanged,
    /// The active song changed to this value.
    ActiveSongChanged(Option<SongRequest>),
    /// An entry was appended to history.
    HistoryChanged,
    /// History was reordered by an operator.
    HistoryOrderChanged,
    /// A setting changed.
    SettingsChanged,
    /// Persistence started or stopped failing.
    Degraded {
        /// Whether writes are currently failing.
        active: bool,
        /// The last write error while active.
        message: Option<String>,
    },
}

/// A durable write owed to the repository.
#[derive(Debug, Clone, PartialEq)]
pub enum PersistOp {
    /// Insert or update a queued request.
    QueueInsert(QueuedRequest),
    /// Drop a queued request.
    QueueRemove(RequestId),
    /// Promote a request to active.
    ActiveSet(SongRequest),
    /// Move the active request into history.
    HistoryAppend(HistoryEntry),
    /// Rewrite history positions.
    HistoryOrder(Vec<RequestId>),
    /// Set one setting.
    Setting {
        /// Setting key.
        key: String,
        /// New value.
        value: serde_json::Value,
    },
    /// Add or remove a login from the blocklist.
    UserBlocked {
        /// Lowercase login.
        login: String,
        /// New blocked state.
        blocked: bool,
    },
}

/// One applied mutation: write first, then events.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    /// Write to make durable before broadcasting.
    pub write: PersistOp,
    /// Events to broadcast afterwards.
    pub events: Vec<EngineEvent>,
}

impl Change {
    const fn new(write: PersistOp, events: Vec<EngineEvent>) -> Self {
        Self { write, events }
    }
}

/// Queue, active song, history, settings, and blocklist.
///
/// Invariants held after every operation:
/// - the queue is sorted by [`QueuedRequest::queue_order`];
/// - a request id lives in at most one of queue, active song, history;
/// - sequence numbers are unique and strictly increasing per submission.
#[derive(Debug, Clone, Default)]
pub struct QueueState {
    queue: Vec<QueuedRequest>,
    active_song: Option<SongRequest>,
    history: Vec<HistoryEntry>,
    settings: Settings,
    blocked_users: BTreeSet<String>,
    next_sequence: u64,
}

impl QueueState {
    /// Empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from what the repository loaded.
    ///
    /// Rows that would violate mutual exclusion (possible after a crash in
    /// degraded mode) are resolved in favour of the later lifecycle stage.
    pub fn from_persisted(persisted: PersistedState) -> Self {
        let PersistedState {
            mut queue,
            mut active_song,
            history,
            settings,
            blocked_users,
        } = persisted;

        let history_ids: HashSet<RequestId> = history.iter().map(|h| h.request.id).collect();
        if active_song
            .as_ref()
            .is_some_and(|a| history_ids.contains(&a.id))
        {
            tracing::warn!("Active song already in history, clearing it");
            active_song = None;
        }
        let active_id = active_song.as_ref().map(|a| a.id);
        let before = queue.len();
        queue.retain(|q| !history_ids.contains(&q.request.id) && Some(q.request.id) != active_id);
        if queue.len() != before {
            tracing::warn!(
                dropped = before.saturating_sub(queue.len()),
                "Dropped queued rows that were already active or completed"
            );
        }
        queue.sort_by(QueuedRequest::queue_order);

        let next_sequence = queue
            .iter()
            .map(|q| q.sequence)
            .max()
            .map_or(0, |s| s.saturating_add(1));

        Self {
            queue,
            active_song,
            history,
            settings,
            blocked_users,
            next_sequence,
        }
    }

    /// Queued requests in play order.
    pub fn queue(&self) -> &[QueuedRequest] {
        &self.queue
    }

    /// The request currently being performed.
    pub const fn active_song(&self) -> Option<&SongRequest> {
        self.active_song.as_ref()
    }

    /// Completed requests, oldest first.
    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Current settings.
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Whether `login` (any case) is blocked.
    pub fn is_blocked(&self, login: &str) -> bool {
        self.blocked_users.contains(&login.trim().to_lowercase())
    }

    /// Validate and enqueue a candidate.
    ///
    /// # Errors
    ///
    /// [`QueueError::Validation`] for malformed input, or
    /// [`QueueError::Policy`] when paused, blocked, or refused by `policy`.
    pub fn submit(
        &mut self,
        candidate: NewRequest,
        now: DateTime<Utc>,
        policy: &dyn SubmissionPolicy,
    ) -> Result<(SongRequest, Change), QueueError> {
        candidate.validate()?;
        if !self.settings.queue_enabled() {
            return Err(PolicyRejection::QueuePaused.into());
        }
        if self.is_blocked(&candidate.requester.login) {
            return Err(PolicyRejection::Blocklisted {
                login: candidate.requester.login.clone(),
            }
            .into());
        }
        let ctx = PolicyContext {
            queue: &self.queue,
            active_song: self.active_song.as_ref(),
            history: &self.history,
            now,
        };
        policy.check(&candidate, &ctx)?;

        let request = candidate.into_request(RequestId::new(), now);
        let entry = QueuedRequest {
            request: request.clone(),
            sequence: self.next_sequence,
        };
        self.next_sequence = self.next_sequence.saturating_add(1);
        self.insert_sorted(entry.clone());

        Ok((
            request,
            Change::new(PersistOp::QueueInsert(entry), vec![EngineEvent::QueueChanged]),
        ))
    }

    /// Move the active song into history, stamped `now`.
    ///
    /// Returns `None` when nothing is active.
    pub fn finalize_active(&mut self, now: DateTime<Utc>) -> Option<Change> {
        let request = self.active_song.take()?;
        let entry = HistoryEntry {
            request,
            completed_at: now,
        };
        self.history.push(entry.clone());
        Some(Change::new(
            PersistOp::HistoryAppend(entry),
            vec![
                EngineEvent::HistoryChanged,
                EngineEvent::ActiveSongChanged(None),
            ],
        ))
    }

    /// Promote the queue head to active.
    ///
    /// Returns `None` when the queue is empty or a song is still active
    /// (finalize it first).
    pub fn activate_next(&mut self) -> Option<(SongRequest, Change)> {
        if self.active_song.is_some() || self.queue.is_empty() {
            return None;
        }
        let request = self.queue.remove(0).request;
        self.active_song = Some(request.clone());
        let change = Change::new(
            PersistOp::ActiveSet(request.clone()),
            vec![
                EngineEvent::QueueChanged,
                EngineEvent::ActiveSongChanged(Some(request.clone())),
            ],
        );
        Some((request, change))
    }

    /// Finalize the active song only if it is `finished`.
    ///
    /// A stale or repeated signal returns `None` and changes nothing.
    pub fn finish_active(&mut self, finished: RequestId, now: DateTime<Utc>) -> Option<Change> {
        if self.active_song.as_ref().map(|a| a.id) != Some(finished) {
            return None;
        }
        self.finalize_active(now)
    }

    /// Drop a queued request.
    ///
    /// # Errors
    ///
    /// [`QueueError::NotFound`] if `id` is not queued.
    pub fn remove_from_queue(&mut self, id: RequestId) -> Result<Change, QueueError> {
        let position = self.position_of(id)?;
        self.queue.remove(position);
        Ok(Change::new(
            PersistOp::QueueRemove(id),
            vec![EngineEvent::QueueChanged],
        ))
    }

    /// Change a queued request's priority and re-sort it.
    ///
    /// The request keeps its timestamp and sequence number, so it lands
    /// where it would have had it been submitted with this priority.
    ///
    /// # Errors
    ///
    /// [`QueueError::NotFound`] if `id` is not queued.
    pub fn reprioritize(&mut self, id: RequestId, priority: Priority) -> Result<Change, QueueError> {
        let position = self.position_of(id)?;
        let mut entry = self.queue.remove(position);
        entry.request.priority = priority;
        self.insert_sorted(entry.clone());
        Ok(Change::new(
            PersistOp::QueueInsert(entry),
            vec![EngineEvent::QueueChanged],
        ))
    }

    /// Replace history order with `order`, oldest first.
    ///
    /// # Errors
    ///
    /// [`QueueError::Validation`] unless `order` is a permutation of the
    /// current history ids.
    pub fn reorder_history(&mut self, order: Vec<RequestId>) -> Result<Change, QueueError> {
        if order.len() != self.history.len() {
            return Err(QueueError::Validation(format!(
                "history order has {} ids, history has {}",
                order.len(),
                self.history.len()
            )));
        }
        let positions: HashMap<RequestId, usize> = self
            .history
            .iter()
            .enumerate()
            .map(|(i, h)| (h.request.id, i))
            .collect();
        let mut seen = HashSet::with_capacity(order.len());
        for id in &order {
            if !positions.contains_key(id) {
                return Err(QueueError::NotFound(*id));
            }
            if !seen.insert(*id) {
                return Err(QueueError::Validation(format!(
                    "history order repeats {id}"
                )));
            }
        }

        let mut slots: Vec<Option<HistoryEntry>> =
            std::mem::take(&mut self.history).into_iter().map(Some).collect();
        self.history = order
            .iter()
            .filter_map(|id| {
                positions
                    .get(id)
                    .and_then(|&i| slots.get_mut(i))
                    .and_then(Option::take)
            })
            .collect();

        Ok(Change::new(
            PersistOp::HistoryOrder(order),
            vec![EngineEvent::HistoryOrderChanged],
        ))
    }

    /// Set one setting.
    ///
    /// # Errors
    ///
    /// [`QueueError::Validation`] for an empty key or a non-boolean
    /// `queue_enabled`.
    pub fn set_setting(
        &mut self,
        key: &str,
        value: serde_json::Value,
    ) -> Result<Change, QueueError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(QueueError::Validation(String::from("setting key is empty")));
        }
        if key == QUEUE_ENABLED && !value.is_boolean() {
            return Err(QueueError::Validation(format!(
                "{QUEUE_ENABLED} must be a boolean"
            )));
        }
        self.settings.set(key, value.clone());
        Ok(Change::new(
            PersistOp::Setting {
                key: key.to_owned(),
                value,
            },
            vec![EngineEvent::SettingsChanged],
        ))
    }

    /// Block or unblock a requester. Not broadcast.
    ///
    /// # Errors
    ///
    /// [`QueueError::Validation`] for an empty login.
    pub fn set_user_blocked(&mut self, login: &str, blocked: bool) -> Result<Change, QueueError> {
        let login = login.trim().to_lowercase();
        if login.is_empty() {
            return Err(QueueError::Validation(String::from("login is empty")));
        }
        if blocked {
            self.blocked_users.insert(login.clone());
        } else {
            self.blocked_users.remove(&login);
        }
        Ok(Change::new(
            PersistOp::UserBlocked { login, blocked },
            Vec::new(),
        ))
    }

    fn position_of(&self, id: RequestId) -> Result<usize, QueueError> {
        self.queue
            .iter()
            .position(|q| q.request.id == id)
            .ok_or(QueueError::NotFound(id))
    }

    fn insert_sorted(&mut self, entry: QueuedRequest) {
        let index = self
            .queue
            .partition_point(|q| q.queue_order(&entry).is_lt());
        self.queue.insert(index, entry);
    }

    /// Check the ordering and mutual-exclusion invariants.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) -> Result<(), String> {
        for pair in self.queue.windows(2) {
            if let [a, b] = pair {
                if !a.queue_order(b).is_lt() {
                    return Err(format!(
                        "queue out of order: {} before {}",
                        a.request.id, b.request.id
                    ));
                }
            }
        }
        let mut seen = HashSet::new();
        let ids = self
            .queue
            .iter()
            .map(|q| q.request.id)
            .chain(self.active_song.iter().map(|a| a.id))
            .chain(self.history.iter().map(|h| h.request.id));
        for id in ids {
            if !seen.insert(id) {
                return Err(format!("request {id} appears in two places"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::panic
)]
mod tests {
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    use super::*;
    use crate::config::QueueConfig;
    use crate::policy::{AllowAll, configured_policy};

    fn at(offset_secs: u32) -> DateTime<Utc> {
        let base = Utc.with_ymd_and_hms(2026, 3, 1, 20, 0, 0).unwrap();
        base + Duration::seconds(i64::from(offset_secs))
    }

    fn candidate(login: &str, request_type: RequestType) -> NewRequest {
        NewRequest::new(
            Requester::new(login, login),
            format!("{login}'s song"),
            format!("https://www.youtube.com/watch?v={login}"),
            request_type,
        )
    }

    fn queued_ids(state: &QueueState) -> Vec<RequestId> {
        state.queue().iter().map(|q| q.request.id).collect()
    }

    #[test]
    fn donation_jumps_earlier_channel_points() {
        let mut state = QueueState::new();
        let (a, _) = state
            .submit(candidate("alice", RequestType::Donation).submitted_at(at(10)), at(10), &AllowAll)
            .unwrap();
        let (b, _) = state
            .submit(
                candidate("bob", RequestType::ChannelPoints).submitted_at(at(5)),
                at(11),
                &AllowAll,
            )
            .unwrap();
        assert_eq!(queued_ids(&state), vec![a.id, b.id]);

        let (active, _) = state.activate_next().unwrap();
        assert_eq!(active.id, a.id);
        assert_eq!(queued_ids(&state), vec![b.id]);

        let change = state.finish_active(a.id, at(200)).unwrap();
        assert_eq!(
            change.events,
            vec![EngineEvent::HistoryChanged, EngineEvent::ActiveSongChanged(None)]
        );
        assert_eq!(state.history().len(), 1);
        assert!(state.active_song().is_none());

        let (active, _) = state.activate_next().unwrap();
        assert_eq!(active.id, b.id);
        assert!(state.queue().is_empty());
        state.check_invariants().unwrap();
    }

    #[test]
    fn identical_timestamps_fall_back_to_sequence() {
        let mut state = QueueState::new();
        let ids: Vec<RequestId> = ["a", "b", "c"]
            .iter()
            .map(|login| {
                state
                    .submit(
                        candidate(login, RequestType::ChannelPoints).submitted_at(at(0)),
                        at(0),
                        &AllowAll,
                    )
                    .unwrap()
                    .0
                    .id
            })
            .collect();
        assert_eq!(queued_ids(&state), ids);
        assert_eq!(queued_ids(&state.clone()), ids);
    }

    #[test]
    fn paused_queue_rejects_without_change() {
        let mut state = QueueState::new();
        state.set_setting(QUEUE_ENABLED, json!(false)).unwrap();
        let err = state
            .submit(candidate("alice", RequestType::Donation), at(0), &AllowAll)
            .unwrap_err();
        assert_eq!(err, QueueError::Policy(PolicyRejection::QueuePaused));
        assert!(state.queue().is_empty());
    }

    #[test]
    fn blocked_requester_is_rejected_case_insensitively() {
        let mut state = QueueState::new();
        state.set_user_blocked("  Troll ", true).unwrap();
        assert!(state.is_blocked("TROLL"));
        let err = state
            .submit(candidate("troll", RequestType::Donation), at(0), &AllowAll)
            .unwrap_err();
        assert!(matches!(err, QueueError::Policy(PolicyRejection::Blocklisted { .. })));

        state.set_user_blocked("troll", false).unwrap();
        assert!(state
            .submit(candidate("troll", RequestType::Donation), at(0), &AllowAll)
            .is_ok());
    }

    #[test]
    fn backdated_resubmission_still_hits_cooldown() {
        let mut state = QueueState::new();
        let policy = configured_policy(&QueueConfig::default());
        let long_ago = at(0) - Duration::days(3650);

        let (first, _) = state
            .submit(
                candidate("spam", RequestType::ChannelPoints).submitted_at(long_ago),
                at(0),
                &policy,
            )
            .unwrap();
        assert_eq!(first.submitted_at, long_ago);
        assert_eq!(first.accepted_at, at(0));

        let err = state
            .submit(
                candidate("spam", RequestType::ChannelPoints).submitted_at(long_ago),
                at(60),
                &policy,
            )
            .unwrap_err();
        assert!(matches!(err, QueueError::Policy(PolicyRejection::Duplicate { .. })));
        assert_eq!(state.queue().len(), 1);
    }

    #[test]
    fn future_submission_time_is_capped_at_acceptance() {
        let mut state = QueueState::new();
        let (early, _) = state
            .submit(candidate("alice", RequestType::ChannelPoints), at(10), &AllowAll)
            .unwrap();
        let (future, _) = state
            .submit(
                candidate("bob", RequestType::ChannelPoints).submitted_at(at(3600)),
                at(20),
                &AllowAll,
            )
            .unwrap();
        assert_eq!(future.submitted_at, at(20));
        assert_eq!(future.accepted_at, at(20));
        assert_eq!(queued_ids(&state), vec![early.id, future.id]);
    }

    #[test]
    fn blank_title_is_a_validation_error() {
        let mut state = QueueState::new();
        let mut bad = candidate("alice", RequestType::Donation);
        bad.song_title = String::from("   ");
        assert!(matches!(
            state.submit(bad, at(0), &AllowAll),
            Err(QueueError::Validation(_))
        ));
    }

    #[test]
    fn advance_on_empty_is_noop() {
        let mut state = QueueState::new();
        assert!(state.finalize_active(at(0)).is_none());
        assert!(state.activate_next().is_none());
        assert!(state.active_song().is_none());
    }

    #[test]
    fn stale_finish_changes_nothing() {
        let mut state = QueueState::new();
        let (a, _) = state
            .submit(candidate("alice", RequestType::Donation), at(0), &AllowAll)
            .unwrap();
        state.activate_next().unwrap();
        assert!(state.finish_active(RequestId::new(), at(5)).is_none());
        assert_eq!(state.active_song().map(|s| s.id), Some(a.id));
        assert!(state.history().is_empty());

        state.finish_active(a.id, at(5)).unwrap();
        assert!(state.finish_active(a.id, at(6)).is_none());
        assert_eq!(state.history().len(), 1);
    }

    #[test]
    fn remove_and_reprioritize() {
        let mut state = QueueState::new();
        let (a, _) = state
            .submit(candidate("a", RequestType::ChannelPoints), at(0), &AllowAll)
            .unwrap();
        let (b, _) = state
            .submit(candidate("b", RequestType::ChannelPoints), at(1), &AllowAll)
            .unwrap();
        let (c, _) = state
            .submit(candidate("c", RequestType::ChannelPoints), at(2), &AllowAll)
            .unwrap();

        state.reprioritize(c.id, Priority::High).unwrap();
        assert_eq!(queued_ids(&state), vec![c.id, a.id, b.id]);
        state.check_invariants().unwrap();

        state.remove_from_queue(a.id).unwrap();
        assert_eq!(queued_ids(&state), vec![c.id, b.id]);
        assert_eq!(
            state.remove_from_queue(a.id).unwrap_err(),
            QueueError::NotFound(a.id)
        );
    }

    #[test]
    fn reorder_history_requires_a_permutation() {
        let mut state = QueueState::new();
        let mut ids = Vec::new();
        for (i, login) in ["a", "b", "c"].iter().enumerate() {
            let (r, _) = state
                .submit(candidate(login, RequestType::Donation), at(0), &AllowAll)
                .unwrap();
            state.activate_next().unwrap();
            state.finalize_active(at(0) + Duration::seconds(i as i64)).unwrap();
            ids.push(r.id);
        }

        assert!(matches!(
            state.reorder_history(vec![ids[0], ids[1]]),
            Err(QueueError::Validation(_))
        ));
        assert!(matches!(
            state.reorder_history(vec![ids[0], ids[0], ids[1]]),
            Err(QueueError::Validation(_))
        ));
        assert!(matches!(
            state.reorder_history(vec![ids[0], ids[1], RequestId::new()]),
            Err(QueueError::NotFound(_))
        ));

        let reversed: Vec<RequestId> = ids.iter().rev().copied().collect();
        let change = state.reorder_history(reversed.clone()).unwrap();
        assert_eq!(change.events, vec![EngineEvent::HistoryOrderChanged]);
        let now: Vec<RequestId> = state.history().iter().map(|h| h.request.id).collect();
        assert_eq!(now, reversed);
    }

    #[test]
    fn queue_enabled_must_be_boolean() {
        let mut state = QueueState::new();
        assert!(state.set_setting(QUEUE_ENABLED, json!("no")).is_err());
        assert!(state.set_setting("", json!(1)).is_err());
        let change = state.set_setting("theme", json!("dark")).unwrap();
        assert_eq!(change.events, vec![EngineEvent::SettingsChanged]);
    }

    #[test]
    fn from_persisted_restores_order_and_exclusion() {
        let mut scratch = QueueState::new();
        let (a, _) = scratch
            .submit(candidate("a", RequestType::ChannelPoints), at(0), &AllowAll)
            .unwrap();
        let (b, _) = scratch
            .submit(candidate("b", RequestType::Donation), at(1), &AllowAll)
            .unwrap();
        let mut queue = scratch.queue().to_vec();
        queue.reverse();
        let persisted = PersistedState {
            queue,
            active_song: None,
            history: vec![HistoryEntry {
                request: a.clone(),
                completed_at: at(30),
            }],
            settings: Settings::default(),
            blocked_users: BTreeSet::new(),
        };

        let mut state = QueueState::from_persisted(persisted);
        assert_eq!(queued_ids(&state), vec![b.id]);
        state.check_invariants().unwrap();

        let (c, _) = state
            .submit(candidate("c", RequestType::Donation), at(1), &AllowAll)
            .unwrap();
        assert_eq!(queued_ids(&state), vec![b.id, c.id]);
    }

    /// Deterministic linear congruential generator for operation sequences.
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self) -> u64 {
            self.0 = self
                .0
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            self.0 >> 33
        }

        fn below(&mut self, n: u64) -> u64 {
            self.next() % n
        }
    }

    #[test]
    fn random_operation_sequences_keep_invariants() {
        for seed in 0..32 {
            let mut rng = Lcg(seed);
            let mut state = QueueState::new();
            for step in 0..200u32 {
                let now = at(0) + Duration::seconds(i64::from(step));
                match rng.below(7) {
                    0..=2 => {
                        let request_type = if rng.below(2) == 0 {
                            RequestType::Donation
                        } else {
                            RequestType::ChannelPoints
                        };
                        let skew = Duration::seconds(rng.below(5) as i64);
                        let login = format!("user{}", rng.below(6));
                        let _ = state.submit(
                            candidate(&login, request_type).submitted_at(now - skew),
                            now,
                            &AllowAll,
                        );
                    }
                    3 => {
                        state.finalize_active(now);
                        state.activate_next();
                    }
                    4 => {
                        if let Some(id) = state.active_song().map(|a| a.id) {
                            state.finish_active(id, now);
                        }
                    }
                    5 => {
                        let len = state.queue().len() as u64;
                        if len > 0 {
                            let id = state.queue()[rng.below(len) as usize].request.id;
                            let _ = state.remove_from_queue(id);
                        }
                    }
                    _ => {
                        let len = state.queue().len() as u64;
                        if len > 0 {
                            let id = state.queue()[rng.below(len) as usize].request.id;
                            let priority = Priority::from_rank(rng.below(3) as i16).unwrap();
                            state.reprioritize(id, priority).unwrap();
                        }
                    }
                }
                if let Err(problem) = state.check_invariants() {
                    panic!("seed {seed} step {step}: {problem}");
                }
            }
        }
    }
}
