//! Persisted sync progress.

use shipwright_engine::{ChatProgress, PartPosition};
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncState {
    /// Last part confirmed persisted. Never moves backwards within a
    /// sub-conversation.
    pub persisted: Option<PartPosition>,
    /// File counter confirmed persisted.
    pub saved_file_counter: u64,
    /// Consecutive failed uploads.
    pub failures: u32,
    pub last_sync: Option<Instant>,
    pub subchat_index: u32,
    /// The "sync failing" warning is showing.
    pub warning: bool,
    /// Human-friendly id, once allocated.
    pub allocated_id: Option<String>,
}

impl SyncState {
    /// Whether local state is already persisted.
    #[must_use]
    pub fn is_caught_up(&self, progress: &ChatProgress, file_counter: u64) -> bool {
        progress.last_complete <= self.persisted && file_counter <= self.saved_file_counter
    }

    /// Record a successful upload. Watermarks only move forward.
    pub fn record_success(
        &mut self,
        position: Option<PartPosition>,
        file_counter: u64,
        at: Instant,
    ) {
        self.persisted = self.persisted.max(position);
        self.saved_file_counter = self.saved_file_counter.max(file_counter);
        self.failures = 0;
        self.last_sync = Some(at);
    }

    /// Start over for another sub-conversation. The allocated id belongs to
    /// the chat and survives.
    pub fn reset_for_subchat(&mut self, subchat_index: u32) {
        *self = Self {
            subchat_index,
            allocated_id: self.allocated_id.take(),
            ..Self::default()
        };
    }
}
