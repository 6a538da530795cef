//! The queue engine: a single task that owns [`QueueState`].
//!
//! Every mutation arrives as a [`Command`] on one channel and runs to
//! completion before the next is read:
//!
//! ```text
//! EngineHandle::submit ──► mpsc ──► validate + mutate (QueueState)
//!                                     │
//!                                     ├─► Repository write (retried)
//!                                     │
//!                                     └─► BroadcastHub::publish ──► observers
//! ```
//!
//! A write that still fails after the configured attempts leaves the
//! mutation in place, parks the write in a backlog, and flips the engine
//! into degraded mode, which observers hear about. Later commits replay
//! the backlog in order before their own write; degraded mode clears only
//! once the backlog is empty.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use encore_db::{DbError, Repository};
use encore_types::{Priority, RequestId, SongRequest};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::hub::{BroadcastHub, StateView};
use crate::policy::SubmissionPolicy;
use crate::state::{Change, EngineEvent, NewRequest, PersistOp, QueueState};

/// Source of "now" for submissions and completions.
pub trait Clock: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;
}

/// [`Clock`] backed by the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Engine tuning taken from [`QueueConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Attempts per durable write.
    pub persist_max_attempts: u32,
    /// Delay before the first retry, doubled each time.
    pub persist_retry_backoff: Duration,
    /// Command channel capacity.
    pub command_buffer: usize,
}

impl From<&QueueConfig> for EngineSettings {
    fn from(config: &QueueConfig) -> Self {
        Self {
            persist_max_attempts: config.persist_max_attempts.max(1),
            persist_retry_backoff: config.persist_retry_backoff(),
            command_buffer: config.command_buffer.max(1),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&QueueConfig::default())
    }
}

type Reply<T> = oneshot::Sender<T>;

/// A mutation request for the engine task.
enum Command {
    Submit {
        request: Box<NewRequest>,
        reply: Reply<Result<SongRequest, QueueError>>,
    },
    Advance {
        reply: Reply<Option<SongRequest>>,
    },
    FinishActive {
        id: RequestId,
        reply: Reply<bool>,
    },
    Remove {
        id: RequestId,
        reply: Reply<Result<(), QueueError>>,
    },
    Reprioritize {
        id: RequestId,
        priority: Priority,
        reply: Reply<Result<(), QueueError>>,
    },
    ReorderHistory {
        order: Vec<RequestId>,
        reply: Reply<Result<(), QueueError>>,
    },
    SetSetting {
        key: String,
        value: serde_json::Value,
        reply: Reply<Result<(), QueueError>>,
    },
    SetUserBlocked {
        login: String,
        blocked: bool,
        reply: Reply<Result<(), QueueError>>,
    },
}

/// The single writer of queue state.
pub struct QueueEngine {
    state: QueueState,
    repository: Arc<dyn Repository>,
    hub: Arc<BroadcastHub>,
    policy: Box<dyn SubmissionPolicy>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
    degraded: Option<String>,
    /// Writes not yet durable, oldest first.
    pending: VecDeque<PersistOp>,
}

impl QueueEngine {
    /// Load persisted state and publish it as the hub's starting view.
    ///
    /// # Errors
    ///
    /// Returns the repository's error if state cannot be loaded.
    pub async fn load(
        repository: Arc<dyn Repository>,
        hub: Arc<BroadcastHub>,
        policy: Box<dyn SubmissionPolicy>,
        settings: EngineSettings,
    ) -> Result<Self, DbError> {
        let persisted = repository.load_state().await?;
        let state = QueueState::from_persisted(persisted);
        tracing::info!(
            queued = state.queue().len(),
            active = state.active_song().is_some(),
            history = state.history().len(),
            "Queue state loaded"
        );
        let engine = Self {
            state,
            repository,
            hub,
            policy,
            clock: Arc::new(SystemClock),
            settings,
            degraded: None,
            pending: VecDeque::new(),
        };
        engine.hub.publish(engine.view(), &[]).await;
        Ok(engine)
    }

    /// Replace the clock (tests pin time with this).
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Start the engine task.
    ///
    /// The task ends once every [`EngineHandle`] has been dropped.
    pub fn spawn(self) -> (EngineHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(self.settings.command_buffer);
        let task = tokio::spawn(self.run(rx));
        (EngineHandle { tx }, task)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        tracing::info!("Queue engine started");
        while let Some(command) = commands.recv().await {
            self.handle(command).await;
        }
        tracing::info!("Queue engine stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Submit { request, reply } => {
                let result = self.submit(*request).await;
                let _ = reply.send(result);
            }
            Command::Advance { reply } => {
                let next = self.advance().await;
                let _ = reply.send(next);
            }
            Command::FinishActive { id, reply } => {
                let now = self.clock.now();
                let finished = match self.state.finish_active(id, now) {
                    Some(change) => {
                        tracing::info!(request_id = %id, "Active song finished");
                        self.commit(change).await;
                        true
                    }
                    None => {
                        tracing::debug!(request_id = %id, "Ignoring stale finish signal");
                        false
                    }
                };
                let _ = reply.send(finished);
            }
            Command::Remove { id, reply } => {
                let result = self.state.remove_from_queue(id);
                let _ = reply.send(self.commit_result(result).await);
            }
            Command::Reprioritize {
                id,
                priority,
                reply,
            } => {
                let result = self.state.reprioritize(id, priority);
                let _ = reply.send(self.commit_result(result).await);
            }
            Command::ReorderHistory { order, reply } => {
                let result = self.state.reorder_history(order);
                let _ = reply.send(self.commit_result(result).await);
            }
            Command::SetSetting { key, value, reply } => {
                let result = self.state.set_setting(&key, value);
                let _ = reply.send(self.commit_result(result).await);
            }
            Command::SetUserBlocked {
                login,
                blocked,
                reply,
            } => {
                let result = self.state.set_user_blocked(&login, blocked);
                let _ = reply.send(self.commit_result(result).await);
            }
        }
    }

    async fn submit(&mut self, request: NewRequest) -> Result<SongRequest, QueueError> {
        let now = self.clock.now();
        match self.state.submit(request, now, self.policy.as_ref()) {
            Ok((accepted, change)) => {
                tracing::info!(
                    request_id = %accepted.id,
                    requester = %accepted.requester.login,
                    priority = ?accepted.priority,
                    "Request accepted"
                );
                self.commit(change).await;
                Ok(accepted)
            }
            Err(e) => {
                tracing::debug!(error = %e, "Request rejected");
                Err(e)
            }
        }
    }

    async fn advance(&mut self) -> Option<SongRequest> {
        let now = self.clock.now();
        if let Some(change) = self.state.finalize_active(now) {
            self.commit(change).await;
        }
        let Some((next, change)) = self.state.activate_next() else {
            tracing::debug!("Advance with empty queue");
            return None;
        };
        tracing::info!(request_id = %next.id, title = %next.song_title, "Now playing");
        self.commit(change).await;
        Some(next)
    }

    async fn commit_result(&mut self, result: Result<Change, QueueError>) -> Result<(), QueueError> {
        let change = result?;
        self.commit(change).await;
        Ok(())
    }

    /// Persist, then publish. Persistence failure degrades instead of
    /// undoing the mutation.
    async fn commit(&mut self, change: Change) {
        let Change { write, mut events } = change;
        self.pending.push_back(write);
        match self.flush_pending().await {
            Ok(()) => {
                if let Some(previous) = self.degraded.take() {
                    tracing::info!(previous_error = %previous, "Persistence recovered, backlog flushed, leaving degraded mode");
                    events.push(EngineEvent::Degraded {
                        active: false,
                        message: None,
                    });
                }
            }
            Err(e) => {
                let message = e.to_string();
                if self.degraded.is_none() {
                    tracing::error!(error = %message, "Persistence failing, entering degraded mode");
                    events.push(EngineEvent::Degraded {
                        active: true,
                        message: Some(message.clone()),
                    });
                } else {
                    tracing::warn!(
                        error = %message,
                        backlog = self.pending.len(),
                        "Persistence still failing"
                    );
                }
                self.degraded = Some(message);
            }
        }
        self.hub.publish(self.view(), &events).await;
    }

    /// Write the backlog in order. Stops at the first write that exhausts
    /// its retries, leaving it and everything after it queued.
    async fn flush_pending(&mut self) -> Result<(), DbError> {
        while let Some(write) = self.pending.front() {
            self.persist(write).await?;
            self.pending.pop_front();
        }
        Ok(())
    }

    async fn persist(&self, write: &PersistOp) -> Result<(), DbError> {
        let mut backoff = self.settings.persist_retry_backoff;
        let mut attempt: u32 = 1;
        loop {
            match self.write_once(write).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.settings.persist_max_attempts => {
                    tracing::warn!(
                        attempt,
                        max_attempts = self.settings.persist_max_attempts,
                        error = %e,
                        "Persistence attempt failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                    attempt = attempt.saturating_add(1);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn write_once(&self, write: &PersistOp) -> Result<(), DbError> {
        let repo = &self.repository;
        match write {
            PersistOp::QueueInsert(entry) => repo.persist_queue_insert(entry).await,
            PersistOp::QueueRemove(id) => repo.persist_queue_remove(*id).await,
            PersistOp::ActiveSet(request) => repo.persist_active_set(request).await,
            PersistOp::HistoryAppend(entry) => repo.persist_history_append(entry).await,
            PersistOp::HistoryOrder(order) => repo.persist_history_order(order).await,
            PersistOp::Setting { key, value } => repo.persist_settings_change(key, value).await,
            PersistOp::UserBlocked { login, blocked } => {
                repo.persist_user_blocked(login, *blocked).await
            }
        }
    }

    fn view(&self) -> StateView {
        StateView {
            queue: self
                .state
                .queue()
                .iter()
                .map(|q| q.request.clone())
                .collect(),
            active_song: self.state.active_song().cloned(),
            history: self.state.history().to_vec(),
            settings: self.state.settings().clone(),
            degraded: self.degraded.clone(),
        }
    }
}

/// Cloneable sender side of the engine.
///
/// Every method waits until the mutation has been persisted (or the
/// engine degraded) and broadcast.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Command>,
}

impl EngineHandle {
    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T, QueueError> {
        let (reply, response) = oneshot::channel();
        if self.tx.send(command(reply)).await.is_err() {
            return Err(QueueError::EngineStopped);
        }
        response.await.or(Err(QueueError::EngineStopped))
    }

    /// Submit a request for the queue.
    ///
    /// # Errors
    ///
    /// Validation or policy rejection, or [`QueueError::EngineStopped`].
    pub async fn submit(&self, request: NewRequest) -> Result<SongRequest, QueueError> {
        self.request(|reply| Command::Submit {
            request: Box::new(request),
            reply,
        })
        .await?
    }

    /// Finish the active song (if any) and start the next one.
    /// `None` means the queue was empty.
    ///
    /// # Errors
    ///
    /// [`QueueError::EngineStopped`] only.
    pub async fn advance(&self) -> Result<Option<SongRequest>, QueueError> {
        self.request(|reply| Command::Advance { reply }).await
    }

    /// Finish the active song if it is `id`. Returns whether anything
    /// happened.
    ///
    /// # Errors
    ///
    /// [`QueueError::EngineStopped`] only.
    pub async fn finish_active(&self, id: RequestId) -> Result<bool, QueueError> {
        self.request(|reply| Command::FinishActive { id, reply }).await
    }

    /// Remove a queued request.
    ///
    /// # Errors
    ///
    /// [`QueueError::NotFound`] if it is not queued.
    pub async fn remove_from_queue(&self, id: RequestId) -> Result<(), QueueError> {
        self.request(|reply| Command::Remove { id, reply }).await?
    }

    /// Change a queued request's priority.
    ///
    /// # Errors
    ///
    /// [`QueueError::NotFound`] if it is not queued.
    pub async fn reprioritize(&self, id: RequestId, priority: Priority) -> Result<(), QueueError> {
        self.request(|reply| Command::Reprioritize {
            id,
            priority,
            reply,
        })
        .await?
    }

    /// Reorder history, oldest first.
    ///
    /// # Errors
    ///
    /// [`QueueError::Validation`] or [`QueueError::NotFound`] unless
    /// `order` is a permutation of current history.
    pub async fn reorder_history(&self, order: Vec<RequestId>) -> Result<(), QueueError> {
        self.request(|reply| Command::ReorderHistory { order, reply })
            .await?
    }

    /// Set one setting.
    ///
    /// # Errors
    ///
    /// [`QueueError::Validation`] for a bad key or value.
    pub async fn set_setting(
        &self,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Result<(), QueueError> {
        let key = key.into();
        self.request(|reply| Command::SetSetting { key, value, reply })
            .await?
    }

    /// Block or unblock a requester.
    ///
    /// # Errors
    ///
    /// [`QueueError::Validation`] for an empty login.
    pub async fn set_user_blocked(&self, login: &str, blocked: bool) -> Result<(), QueueError> {
        let login = login.to_owned();
        self.request(|reply| Command::SetUserBlocked {
            login,
            blocked,
            reply,
        })
        .await?
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::panic
)]
mod tests {
    use std::sync::Mutex;

    use chrono::TimeZone;
    use encore_db::InMemoryRepository;
    use encore_types::{QUEUE_ENABLED, RequestType, Requester, ServerMessage};
    use serde_json::json;

    use super::*;
    use crate::error::PolicyRejection;
    use crate::hub::Subscription;
    use crate::policy::AllowAll;

    struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        fn set(&self, at: DateTime<Utc>) {
            *self.0.lock().unwrap() = at;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    fn at(offset_secs: u32) -> DateTime<Utc> {
        let base = Utc.with_ymd_and_hms(2026, 3, 1, 20, 0, 0).unwrap();
        base + chrono::Duration::seconds(i64::from(offset_secs))
    }

    struct Harness {
        handle: EngineHandle,
        hub: Arc<BroadcastHub>,
        repo: Arc<InMemoryRepository>,
        clock: Arc<ManualClock>,
    }

    async fn start(repo: Arc<InMemoryRepository>) -> Harness {
        let hub = Arc::new(BroadcastHub::new(64, 50));
        let clock = Arc::new(ManualClock(Mutex::new(at(0))));
        let settings = EngineSettings {
            persist_max_attempts: 3,
            persist_retry_backoff: Duration::ZERO,
            command_buffer: 16,
        };
        let store: Arc<dyn Repository> = Arc::clone(&repo) as Arc<dyn Repository>;
        let engine_clock: Arc<dyn Clock> = Arc::clone(&clock) as Arc<dyn Clock>;
        let engine = QueueEngine::load(store, Arc::clone(&hub), Box::new(AllowAll), settings)
            .await
            .unwrap()
            .with_clock(engine_clock);
        let (handle, _task) = engine.spawn();
        Harness {
            handle,
            hub,
            repo,
            clock,
        }
    }

    fn request(login: &str, request_type: RequestType) -> NewRequest {
        NewRequest::new(
            Requester::new(login, login),
            format!("{login} song"),
            format!("https://www.youtube.com/watch?v={login}"),
            request_type,
        )
    }

    async fn subscribed(hub: &BroadcastHub) -> Subscription {
        let mut sub = hub.register().await;
        assert!(matches!(
            sub.receiver.recv().await,
            Some(ServerMessage::InitialState(_))
        ));
        sub
    }

    fn drain(sub: &mut Subscription) -> Vec<&'static str> {
        let mut names = Vec::new();
        while let Ok(message) = sub.receiver.try_recv() {
            names.push(message.event_name());
        }
        names
    }

    #[tokio::test]
    async fn donation_then_channel_points_lifecycle() {
        let h = start(Arc::new(InMemoryRepository::new())).await;
        let mut sub = subscribed(&h.hub).await;

        h.clock.set(at(10));
        let a = h
            .handle
            .submit(request("alice", RequestType::Donation))
            .await
            .unwrap();
        h.clock.set(at(11));
        let b = h
            .handle
            .submit(request("bob", RequestType::ChannelPoints).submitted_at(at(5)))
            .await
            .unwrap();
        let queue: Vec<RequestId> = h.hub.snapshot().await.queue.iter().map(|r| r.id).collect();
        assert_eq!(queue, vec![a.id, b.id]);

        assert_eq!(h.handle.advance().await.unwrap().map(|r| r.id), Some(a.id));
        let snapshot = h.hub.snapshot().await;
        assert_eq!(snapshot.active_song.map(|r| r.id), Some(a.id));
        assert_eq!(snapshot.queue.len(), 1);

        assert!(h.handle.finish_active(a.id).await.unwrap());
        let snapshot = h.hub.snapshot().await;
        assert!(snapshot.active_song.is_none());
        assert_eq!(snapshot.history.len(), 1);

        assert_eq!(h.handle.advance().await.unwrap().map(|r| r.id), Some(b.id));
        assert!(h.hub.snapshot().await.queue.is_empty());

        assert_eq!(
            drain(&mut sub),
            vec![
                "queueUpdate",
                "queueUpdate",
                "queueUpdate",
                "activeSong",
                "historyUpdate",
                "activeSong",
                "queueUpdate",
                "activeSong",
            ]
        );
    }

    #[tokio::test]
    async fn advance_finalizes_current_before_promoting() {
        let h = start(Arc::new(InMemoryRepository::new())).await;
        h.handle.submit(request("a", RequestType::Donation)).await.unwrap();
        h.handle.submit(request("b", RequestType::Donation)).await.unwrap();
        h.handle.advance().await.unwrap();

        let mut sub = subscribed(&h.hub).await;
        h.handle.advance().await.unwrap();
        let mut active = Vec::new();
        while let Ok(message) = sub.receiver.try_recv() {
            if let ServerMessage::ActiveSong(song) = message {
                active.push(song.map(|s| s.song_title));
            }
        }
        assert_eq!(active, vec![None, Some(String::from("b song"))]);
        assert_eq!(h.repo.stored().await.history.len(), 1);
    }

    #[tokio::test]
    async fn empty_advance_and_stale_finish_emit_nothing() {
        let h = start(Arc::new(InMemoryRepository::new())).await;
        let mut sub = subscribed(&h.hub).await;

        assert_eq!(h.handle.advance().await.unwrap(), None);
        assert!(!h.handle.finish_active(RequestId::new()).await.unwrap());
        assert!(drain(&mut sub).is_empty());
        assert_eq!(h.repo.successful_writes(), 0);
    }

    #[tokio::test]
    async fn paused_queue_rejects_without_broadcast() {
        let h = start(Arc::new(InMemoryRepository::new())).await;
        h.handle.set_setting(QUEUE_ENABLED, json!(false)).await.unwrap();
        let mut sub = subscribed(&h.hub).await;
        let writes = h.repo.successful_writes();

        let err = h
            .handle
            .submit(request("alice", RequestType::Donation))
            .await
            .unwrap_err();
        assert_eq!(err, QueueError::Policy(PolicyRejection::QueuePaused));
        assert!(drain(&mut sub).is_empty());
        assert_eq!(h.repo.successful_writes(), writes);
        assert!(h.hub.snapshot().await.queue.is_empty());
    }

    #[tokio::test]
    async fn events_follow_durable_writes() {
        let h = start(Arc::new(InMemoryRepository::new())).await;
        let mut sub = subscribed(&h.hub).await;

        let accepted = h
            .handle
            .submit(request("alice", RequestType::Donation))
            .await
            .unwrap();
        assert!(matches!(
            sub.receiver.recv().await,
            Some(ServerMessage::QueueUpdate(_))
        ));
        let stored = h.repo.stored().await;
        assert_eq!(stored.queue.first().map(|q| q.request.id), Some(accepted.id));
    }

    #[tokio::test]
    async fn transient_failures_are_retried_silently() {
        let h = start(Arc::new(InMemoryRepository::new())).await;
        let mut sub = subscribed(&h.hub).await;

        h.repo.fail_next_writes(2);
        h.handle.submit(request("alice", RequestType::Donation)).await.unwrap();
        assert_eq!(drain(&mut sub), vec!["queueUpdate"]);
        assert_eq!(h.repo.stored().await.queue.len(), 1);
        assert!(!h.hub.snapshot().await.degraded);
    }

    #[tokio::test]
    async fn exhausted_retries_degrade_then_recover() {
        let h = start(Arc::new(InMemoryRepository::new())).await;
        let mut sub = subscribed(&h.hub).await;

        h.repo.set_unavailable(true);
        let accepted = h
            .handle
            .submit(request("alice", RequestType::Donation))
            .await
            .unwrap();
        let snapshot = h.hub.snapshot().await;
        assert!(snapshot.degraded);
        assert_eq!(snapshot.queue.first().map(|r| r.id), Some(accepted.id));
        assert!(h.repo.stored().await.queue.is_empty());

        h.handle.submit(request("bob", RequestType::Donation)).await.unwrap();

        h.repo.set_unavailable(false);
        h.handle.submit(request("carol", RequestType::Donation)).await.unwrap();
        let recovered = h.hub.snapshot().await;
        assert!(!recovered.degraded);

        let mut degraded = Vec::new();
        while let Ok(message) = sub.receiver.try_recv() {
            if let ServerMessage::Degraded { active, .. } = message {
                degraded.push(active);
            }
        }
        assert_eq!(degraded, vec![true, false]);

        let stored: Vec<String> = h
            .repo
            .stored()
            .await
            .queue
            .iter()
            .map(|q| q.request.requester.login.clone())
            .collect();
        assert_eq!(stored, vec!["alice", "bob", "carol"]);

        let repo = Arc::clone(&h.repo);
        drop(h);
        let reloaded = start(repo).await;
        assert_eq!(reloaded.hub.snapshot().await, recovered);
    }

    #[tokio::test]
    async fn degraded_mode_holds_until_backlog_is_written() {
        let h = start(Arc::new(InMemoryRepository::new())).await;
        let mut sub = subscribed(&h.hub).await;

        h.repo.set_unavailable(true);
        h.handle.submit(request("alice", RequestType::Donation)).await.unwrap();
        h.repo.set_unavailable(false);

        // Enough failures to exhaust every attempt on the replayed write.
        h.repo.fail_next_writes(3);
        h.handle.submit(request("bob", RequestType::Donation)).await.unwrap();
        assert!(h.hub.snapshot().await.degraded);
        assert!(h.repo.stored().await.queue.is_empty());

        h.handle.advance().await.unwrap();
        assert!(!h.hub.snapshot().await.degraded);
        let stored = h.repo.stored().await;
        assert_eq!(stored.queue.len(), 1);
        assert_eq!(
            stored.active_song.map(|r| r.requester.login),
            Some(String::from("alice"))
        );

        let mut degraded = Vec::new();
        while let Ok(message) = sub.receiver.try_recv() {
            if let ServerMessage::Degraded { active, .. } = message {
                degraded.push(active);
            }
        }
        assert_eq!(degraded, vec![true, false]);
    }

    #[tokio::test]
    async fn state_survives_reload() {
        let repo = Arc::new(InMemoryRepository::new());
        let h = start(Arc::clone(&repo)).await;
        for login in ["a", "b", "c", "d"] {
            h.handle.submit(request(login, RequestType::ChannelPoints)).await.unwrap();
        }
        let d = h.hub.snapshot().await.queue.last().map(|r| r.id).unwrap();
        h.handle.reprioritize(d, Priority::High).await.unwrap();
        h.handle.advance().await.unwrap();
        h.handle.advance().await.unwrap();
        h.handle.set_user_blocked("Spammer", true).await.unwrap();
        let before = h.hub.snapshot().await;
        drop(h);

        let reloaded = start(repo).await;
        assert_eq!(reloaded.hub.snapshot().await, before);
        let err = reloaded
            .handle
            .submit(request("spammer", RequestType::Donation))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            QueueError::Policy(PolicyRejection::Blocklisted { .. })
        ));
    }

    #[tokio::test]
    async fn history_reorder_emits_signal_only() {
        let h = start(Arc::new(InMemoryRepository::new())).await;
        let mut ids = Vec::new();
        for login in ["a", "b"] {
            ids.push(h.handle.submit(request(login, RequestType::Donation)).await.unwrap().id);
            h.handle.advance().await.unwrap();
        }
        h.handle.advance().await.unwrap();
        let mut sub = subscribed(&h.hub).await;

        ids.reverse();
        h.handle.reorder_history(ids.clone()).await.unwrap();
        assert_eq!(drain(&mut sub), vec!["historyOrderChanged"]);
        let stored: Vec<RequestId> = h
            .repo
            .stored()
            .await
            .history
            .iter()
            .map(|e| e.request.id)
            .collect();
        assert_eq!(stored, ids);

        assert!(matches!(
            h.handle.reorder_history(vec![ids[0]]).await,
            Err(QueueError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn late_observer_snapshot_matches_engine() {
        let h = start(Arc::new(InMemoryRepository::new())).await;
        h.handle.submit(request("a", RequestType::Donation)).await.unwrap();
        h.handle.advance().await.unwrap();
        h.handle.submit(request("b", RequestType::ChannelPoints)).await.unwrap();

        let mut sub = h.hub.register().await;
        let Some(ServerMessage::InitialState(snapshot)) = sub.receiver.recv().await else {
            panic!("first message must be initialState");
        };
        assert_eq!(*snapshot, h.hub.snapshot().await);
        assert!(sub.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn stopped_engine_reports_it() {
        let repo: Arc<dyn Repository> = Arc::new(InMemoryRepository::new());
        let hub = Arc::new(BroadcastHub::new(8, 50));
        let engine = QueueEngine::load(repo, hub, Box::new(AllowAll), EngineSettings::default())
            .await
            .unwrap();
        let (handle, task) = engine.spawn();
        task.abort();
        let _ = task.await;
        assert_eq!(handle.advance().await, Err(QueueError::EngineStopped));
    }
}
