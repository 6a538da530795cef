//! Injectable submission policies.
//!
//! The engine itself enforces the pause switch and the blocklist. Anything
//! else (duplicate detection, per-user limits) is a [`SubmissionPolicy`]
//! handed to the engine at construction. Plain closures implement the
//! trait, so a one-off rule needs no new type.

use chrono::{DateTime, Duration, Utc};
use encore_types::{HistoryEntry, QueuedRequest, SongRequest};

use crate::config::QueueConfig;
use crate::error::PolicyRejection;
use crate::state::NewRequest;

/// Read-only view of the queue state a policy may inspect.
#[derive(Debug, Clone, Copy)]
pub struct PolicyContext<'a> {
    /// Requests waiting in the queue.
    pub queue: &'a [QueuedRequest],
    /// The active song, if any.
    pub active_song: Option<&'a SongRequest>,
    /// All completed requests.
    pub history: &'a [HistoryEntry],
    /// The engine clock at the time of the check.
    pub now: DateTime<Utc>,
}

impl<'a> PolicyContext<'a> {
    /// Every request the engine knows about, regardless of where it is.
    pub fn all_requests(&self) -> impl Iterator<Item = &'a SongRequest> + 'a {
        let queue = self.queue;
        let history = self.history;
        queue
            .iter()
            .map(|q| &q.request)
            .chain(self.active_song)
            .chain(history.iter().map(|h| &h.request))
    }
}

/// A rule deciding whether a candidate request may enter the queue.
pub trait SubmissionPolicy: Send + Sync {
    /// Return `Err` to reject the candidate.
    fn check(&self, candidate: &NewRequest, ctx: &PolicyContext<'_>)
    -> Result<(), PolicyRejection>;
}

impl<F> SubmissionPolicy for F
where
    F: Fn(&NewRequest, &PolicyContext<'_>) -> Result<(), PolicyRejection> + Send + Sync,
{
    fn check(
        &self,
        candidate: &NewRequest,
        ctx: &PolicyContext<'_>,
    ) -> Result<(), PolicyRejection> {
        self(candidate, ctx)
    }
}

/// Accepts everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl SubmissionPolicy for AllowAll {
    fn check(&self, _: &NewRequest, _: &PolicyContext<'_>) -> Result<(), PolicyRejection> {
        Ok(())
    }
}

/// Rejects a link the same requester already submitted within `window`.
///
/// Looks at queue, active song, and history alike, comparing the time the
/// engine accepted the earlier request. Client-supplied `submitted_at`
/// plays no part.
#[derive(Debug, Clone, Copy)]
pub struct DuplicateCooldown {
    window: Duration,
}

impl DuplicateCooldown {
    /// Create a cooldown of `window`.
    pub const fn new(window: Duration) -> Self {
        Self { window }
    }
}

impl SubmissionPolicy for DuplicateCooldown {
    fn check(
        &self,
        candidate: &NewRequest,
        ctx: &PolicyContext<'_>,
    ) -> Result<(), PolicyRejection> {
        let since = ctx.now.checked_sub_signed(self.window).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let link = candidate.song_link.trim();
        let duplicate = ctx.all_requests().any(|r| {
            r.requester.login == candidate.requester.login
                && r.song_link.trim() == link
                && r.accepted_at >= since
        });
        if duplicate {
            return Err(PolicyRejection::Duplicate {
                login: candidate.requester.login.clone(),
                song_link: link.to_owned(),
            });
        }
        Ok(())
    }
}

/// The policy the server runs with: duplicate cooldown when a non-zero
/// window is configured, otherwise nothing beyond the built-in checks.
pub fn configured_policy(config: &QueueConfig) -> PolicyChain {
    let chain = PolicyChain::new();
    if config.duplicate_cooldown_secs == 0 {
        return chain;
    }
    let secs = i64::try_from(config.duplicate_cooldown_secs).unwrap_or(i64::MAX);
    let window = Duration::try_seconds(secs).unwrap_or(Duration::MAX);
    chain.with(DuplicateCooldown::new(window))
}

/// Runs several policies in order; the first rejection wins.
#[derive(Default)]
pub struct PolicyChain {
    policies: Vec<Box<dyn SubmissionPolicy>>,
}

impl PolicyChain {
    /// Create an empty chain (accepts everything).
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a policy.
    #[must_use]
    pub fn with(mut self, policy: impl SubmissionPolicy + 'static) -> Self {
        self.policies.push(Box::new(policy));
        self
    }
}

impl SubmissionPolicy for PolicyChain {
    fn check(
        &self,
        candidate: &NewRequest,
        ctx: &PolicyContext<'_>,
    ) -> Result<(), PolicyRejection> {
        self.policies.iter().try_for_each(|p| p.check(candidate, ctx))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use encore_types::{Priority, RequestId, RequestType, Requester};

    use super::*;

    fn candidate(login: &str, link: &str) -> NewRequest {
        NewRequest::new(
            Requester::new(login, login),
            "Song",
            link,
            RequestType::ChannelPoints,
        )
    }

    fn queued(login: &str, link: &str, accepted_at: DateTime<Utc>) -> QueuedRequest {
        QueuedRequest {
            request: SongRequest {
                id: RequestId::new(),
                requester: Requester::new(login, login),
                song_title: String::from("Song"),
                song_link: link.to_owned(),
                request_type: RequestType::ChannelPoints,
                priority: Priority::Low,
                submitted_at: accepted_at,
                accepted_at,
                duration_seconds: None,
                thumbnail_url: None,
                channel_name: None,
            },
            sequence: 1,
        }
    }

    #[test]
    fn cooldown_rejects_same_link_same_requester() {
        let now = Utc::now();
        let queue = [queued("alice", "https://youtu.be/a", now - Duration::minutes(5))];
        let ctx = PolicyContext { queue: &queue, active_song: None, history: &[], now };
        let policy = DuplicateCooldown::new(Duration::hours(1));

        let result = policy.check(&candidate("alice", "https://youtu.be/a"), &ctx);
        assert!(matches!(result, Err(PolicyRejection::Duplicate { .. })));
        assert!(policy.check(&candidate("bob", "https://youtu.be/a"), &ctx).is_ok());
        assert!(policy.check(&candidate("alice", "https://youtu.be/b"), &ctx).is_ok());
    }

    #[test]
    fn cooldown_uses_acceptance_time_not_redemption_time() {
        let now = Utc::now();
        let mut earlier = queued("alice", "https://youtu.be/a", now - Duration::minutes(1));
        earlier.request.submitted_at = now - Duration::days(365);
        let queue = [earlier];
        let ctx = PolicyContext { queue: &queue, active_song: None, history: &[], now };
        let policy = DuplicateCooldown::new(Duration::hours(1));

        let result = policy.check(&candidate("alice", "https://youtu.be/a"), &ctx);
        assert!(matches!(result, Err(PolicyRejection::Duplicate { .. })));
    }

    #[test]
    fn cooldown_expires() {
        let now = Utc::now();
        let queue = [queued("alice", "https://youtu.be/a", now - Duration::hours(2))];
        let ctx = PolicyContext { queue: &queue, active_song: None, history: &[], now };
        let policy = DuplicateCooldown::new(Duration::hours(1));
        assert!(policy.check(&candidate("alice", "https://youtu.be/a"), &ctx).is_ok());
    }

    #[test]
    fn zero_cooldown_disables_duplicate_check() {
        let now = Utc::now();
        let queue = [queued("alice", "https://youtu.be/a", now)];
        let ctx = PolicyContext { queue: &queue, active_song: None, history: &[], now };
        let candidate = candidate("alice", "https://youtu.be/a");

        let mut config = QueueConfig::default();
        assert!(configured_policy(&config).check(&candidate, &ctx).is_err());
        config.duplicate_cooldown_secs = 0;
        assert!(configured_policy(&config).check(&candidate, &ctx).is_ok());
    }

    #[test]
    fn closures_are_policies_and_chains_stop_at_first_rejection() {
        let ctx = PolicyContext { queue: &[], active_song: None, history: &[], now: Utc::now() };
        let chain = PolicyChain::new()
            .with(AllowAll)
            .with(|c: &NewRequest, _: &PolicyContext<'_>| {
                if c.song_title.contains("Baby Shark") {
                    Err(PolicyRejection::Custom(String::from("not today")))
                } else {
                    Ok(())
                }
            });

        assert!(chain.check(&candidate("alice", "https://youtu.be/a"), &ctx).is_ok());
        let mut shark = candidate("alice", "https://youtu.be/s");
        shark.song_title = String::from("Baby Shark Dance");
        assert_eq!(
            chain.check(&shark, &ctx).unwrap_err(),
            PolicyRejection::Custom(String::from("not today"))
        );
    }
}
