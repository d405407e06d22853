//! Unload guard: warns before leaving with unsynced state.

use shipwright_engine::ChatProgress;
use tokio::sync::watch;

use crate::state::SyncState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnloadDecision {
    Allow,
    /// Something local is not persisted yet; ask before leaving.
    Confirm {
        messages_pending: bool,
        files_pending: bool,
    },
}

#[derive(Debug, Clone)]
pub struct UnloadGuard {
    pub(crate) state: watch::Receiver<SyncState>,
    pub(crate) progress: watch::Receiver<ChatProgress>,
    pub(crate) file_counter: watch::Receiver<u64>,
}

impl UnloadGuard {
    #[must_use]
    pub fn check(&self) -> UnloadDecision {
        let progress = *self.progress.borrow();
        let file_counter = *self.file_counter.borrow();
        let state = self.state.borrow();
        let messages_pending = progress.last_complete > state.persisted;
        let files_pending = file_counter > state.saved_file_counter;
        if messages_pending || files_pending {
            UnloadDecision::Confirm {
                messages_pending,
                files_pending,
            }
        } else {
            UnloadDecision::Allow
        }
    }
}
