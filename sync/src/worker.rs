//! The background sync loop.
//!
//! Watches conversation progress and the file counter, and uploads whatever
//! lies past the persisted watermarks. One round runs at a time; a failed
//! round retries the same delta with backoff until it lands or the active
//! sub-conversation changes underneath it.

use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use shipwright_engine::{ChatProgress, Conversation, FileChangeTracker, PartPosition};
use shipwright_parser::first_artifact_title;
use shipwright_types::{ChatId, SessionId};
use tokio::sync::{Notify, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use crate::SyncError;
use crate::backend::PersistenceBackend;
use crate::backoff::BackoffConfig;
use crate::payload::{SyncDelta, gzip_json};
use crate::state::SyncState;
use crate::unload::UnloadGuard;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTarget {
    pub chat_id: ChatId,
    pub session_id: SessionId,
}

impl SyncTarget {
    #[must_use]
    pub fn new(chat_id: ChatId, session_id: SessionId) -> Self {
        Self {
            chat_id,
            session_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Minimum spacing between rounds.
    pub min_sync_interval: Duration,
    /// Consecutive failures before the warning is raised.
    pub warning_failure_threshold: u32,
    pub backoff: BackoffConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            min_sync_interval: Duration::from_secs(1),
            warning_failure_threshold: 3,
            backoff: BackoffConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    RoundStarted {
        position: Option<PartPosition>,
        file_counter: u64,
        messages: bool,
        snapshot: bool,
    },
    IdAllocated {
        id: String,
    },
    Synced {
        position: Option<PartPosition>,
        file_counter: u64,
    },
    Failed {
        failures: u32,
        delay: Duration,
    },
    WarningRaised {
        failures: u32,
    },
    WarningCleared,
    /// A retry was dropped because the sub-conversation changed.
    Abandoned {
        subchat_index: u32,
    },
}

/// How a single round ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    Synced,
    /// Nothing past the watermarks.
    Skipped,
    /// Another round is in flight.
    Busy,
    /// History not loaded, or the active sub-conversation is not the latest.
    NotReady,
    /// The delta could not be built.
    Failed,
    Abandoned,
}

struct InFlight<'a> {
    flag: &'a AtomicBool,
    done: &'a Notify,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
        self.done.notify_waiters();
    }
}

pub struct SyncWorker {
    backend: Arc<dyn PersistenceBackend>,
    conversation: Arc<Conversation>,
    tracker: Arc<FileChangeTracker>,
    target: SyncTarget,
    config: SyncConfig,
    state: watch::Sender<SyncState>,
    events: broadcast::Sender<SyncEvent>,
    in_flight: AtomicBool,
    round_done: Notify,
}

impl SyncWorker {
    pub fn new(
        backend: Arc<dyn PersistenceBackend>,
        conversation: Arc<Conversation>,
        tracker: Arc<FileChangeTracker>,
        target: SyncTarget,
        config: SyncConfig,
    ) -> Self {
        let (state, _) = watch::channel(SyncState::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            backend,
            conversation,
            tracker,
            target,
            config,
            state,
            events,
            in_flight: AtomicBool::new(false),
            round_done: Notify::new(),
        }
    }

    /// Resume from previously persisted watermarks.
    #[must_use]
    pub fn with_state(self, state: SyncState) -> Self {
        self.state.send_replace(state);
        self
    }

    #[must_use]
    pub fn state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn unload_guard(&self) -> UnloadGuard {
        UnloadGuard {
            state: self.state.subscribe(),
            progress: self.conversation.subscribe(),
            file_counter: self.tracker.subscribe(),
        }
    }

    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    /// Sync until the conversation or tracker goes away.
    pub async fn run(&self) {
        let mut progress = self.conversation.subscribe();
        let mut counter = self.tracker.subscribe();
        loop {
            let snapshot = *progress.borrow_and_update();
            let files = *counter.borrow_and_update();

            if !snapshot.is_current() {
                if progress.changed().await.is_err() {
                    return;
                }
                continue;
            }
            self.follow_subchat(snapshot.subchat_index);

            if self.state.borrow().is_caught_up(&snapshot, files) {
                tokio::select! {
                    changed = progress.changed() => if changed.is_err() { return },
                    changed = counter.changed() => if changed.is_err() { return },
                }
                continue;
            }

            self.debounce().await;
            let done = self.round_done.notified();
            tokio::pin!(done);
            done.as_mut().enable();
            let outcome = self.sync_round().await;
            debug!(?outcome, "Sync round finished");

            match outcome {
                RoundOutcome::Busy => done.await,
                RoundOutcome::Skipped | RoundOutcome::NotReady => {
                    tokio::select! {
                        changed = progress.changed() => if changed.is_err() { return },
                        changed = counter.changed() => if changed.is_err() { return },
                    }
                }
                RoundOutcome::Synced | RoundOutcome::Failed | RoundOutcome::Abandoned => {}
            }
        }
    }

    /// Run one round. Returns once the delta is persisted, there is nothing
    /// to send, or the retry is abandoned.
    pub async fn sync_round(&self) -> RoundOutcome {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return RoundOutcome::Busy;
        }
        let _flight = InFlight {
            flag: &self.in_flight,
            done: &self.round_done,
        };

        let progress = self.conversation.progress();
        if !progress.is_current() {
            return RoundOutcome::NotReady;
        }
        self.follow_subchat(progress.subchat_index);

        let delta = match self.build_delta(&progress) {
            Ok(Some(delta)) => delta,
            Ok(None) => return RoundOutcome::Skipped,
            Err(e) => {
                error!("Failed to encode sync payload: {e}");
                let failures = self.record_failure();
                time::sleep(self.config.backoff.delay(failures)).await;
                return RoundOutcome::Failed;
            }
        };

        self.emit(SyncEvent::RoundStarted {
            position: delta.position,
            file_counter: delta.file_counter,
            messages: delta.messages.is_some(),
            snapshot: delta.snapshot.is_some(),
        });

        loop {
            match self.push(&delta).await {
                Ok(()) => {
                    self.record_success(&delta);
                    return RoundOutcome::Synced;
                }
                Err(e) => {
                    let failures = self.record_failure();
                    let delay = self.config.backoff.delay(failures);
                    warn!(
                        failures,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Sync failed: {e}"
                    );
                    self.emit(SyncEvent::Failed { failures, delay });
                    if !self.wait_for_retry(delay, delta.subchat_index).await {
                        info!(
                            subchat = delta.subchat_index,
                            "Sub-conversation changed; dropping retry"
                        );
                        self.emit(SyncEvent::Abandoned {
                            subchat_index: delta.subchat_index,
                        });
                        return RoundOutcome::Abandoned;
                    }
                }
            }
        }
    }

    fn build_delta(&self, progress: &ChatProgress) -> Result<Option<SyncDelta>, SyncError> {
        let state = self.state();
        let file_counter = self.tracker.counter();
        let messages_behind = progress.last_complete > state.persisted;
        let files_behind = file_counter > state.saved_file_counter;
        if !messages_behind && !files_behind {
            return Ok(None);
        }

        let messages = match progress.last_complete {
            Some(upto) if messages_behind => {
                Some(gzip_json(&self.conversation.messages_through(upto))?)
            }
            _ => None,
        };
        let snapshot = if files_behind {
            let files = self
                .tracker
                .files()
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            Some(gzip_json(&files)?)
        } else {
            None
        };

        Ok(Some(SyncDelta {
            chat_id: self.target.chat_id.clone(),
            session_id: self.target.session_id.clone(),
            position: if messages_behind {
                progress.last_complete
            } else {
                state.persisted
            },
            subchat_index: progress.subchat_index,
            file_counter: if files_behind {
                file_counter
            } else {
                state.saved_file_counter
            },
            messages,
            snapshot,
        }))
    }

    async fn push(&self, delta: &SyncDelta) -> Result<(), SyncError> {
        let needs_id = self.state.borrow().allocated_id.is_none();
        if needs_id && let Some(hint) = self.conversation.with_messages(first_artifact_title) {
            let id = self
                .backend
                .allocate_id(&self.target.chat_id, &hint)
                .await?;
            info!(chat = %self.target.chat_id, id = %id, "Allocated chat id");
            self.state
                .send_modify(|s| s.allocated_id = Some(id.clone()));
            self.emit(SyncEvent::IdAllocated { id });
        }
        self.backend.upload(delta).await
    }

    /// Sleep out the backoff. False if the sub-conversation moved on.
    async fn wait_for_retry(&self, delay: Duration, subchat_index: u32) -> bool {
        let mut progress = self.conversation.subscribe();
        let sleep = time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            if progress.borrow_and_update().subchat_index != subchat_index {
                return false;
            }
            tokio::select! {
                () = &mut sleep => {
                    return self.conversation.progress().subchat_index == subchat_index;
                }
                changed = progress.changed() => {
                    if changed.is_err() {
                        (&mut sleep).await;
                        return true;
                    }
                }
            }
        }
    }

    async fn debounce(&self) {
        let last_sync = self.state.borrow().last_sync;
        if let Some(last_sync) = last_sync {
            let elapsed = last_sync.elapsed();
            if elapsed < self.config.min_sync_interval {
                time::sleep(self.config.min_sync_interval - elapsed).await;
            }
        }
    }

    fn follow_subchat(&self, subchat_index: u32) {
        let changed = self.state.send_if_modified(|s| {
            if s.subchat_index == subchat_index {
                return false;
            }
            s.reset_for_subchat(subchat_index);
            true
        });
        if changed {
            debug!(subchat = subchat_index, "Reset sync state for sub-conversation");
        }
    }

    fn record_success(&self, delta: &SyncDelta) {
        let now = Instant::now();
        let mut cleared = false;
        self.state.send_modify(|s| {
            if s.subchat_index == delta.subchat_index {
                s.record_success(delta.position, delta.file_counter, now);
            } else {
                s.failures = 0;
                s.last_sync = Some(now);
            }
            cleared = mem::take(&mut s.warning);
        });
        if cleared {
            self.emit(SyncEvent::WarningCleared);
        }
        info!(
            rank = delta.last_message_rank(),
            part = delta.part_index(),
            files = delta.file_counter,
            "Synced"
        );
        self.emit(SyncEvent::Synced {
            position: delta.position,
            file_counter: delta.file_counter,
        });
    }

    fn record_failure(&self) -> u32 {
        let threshold = self.config.warning_failure_threshold;
        let mut failures = 0;
        let mut raised = false;
        self.state.send_modify(|s| {
            s.failures += 1;
            failures = s.failures;
            if s.failures >= threshold && !s.warning {
                s.warning = true;
                raised = true;
            }
        });
        if raised {
            warn!(failures, "Sync keeps failing");
            self.emit(SyncEvent::WarningRaised { failures });
        }
        failures
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
