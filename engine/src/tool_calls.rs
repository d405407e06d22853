//! Pending tool-call table.
//!
//! Each model tool call gets one slot, addressed by its correlation id. The
//! slot holds the sending half of a oneshot until the queue resolves it; the
//! model step holds the receiving half as a [`ToolCallPromise`]. Slots are
//! never removed, so a second resolve for the same id is detected rather than
//! silently dropped.

use std::collections::HashMap;
use std::mem;

use shipwright_types::ToolOutcome;
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ToolCallError {
    #[error("tool call `{id}` is already registered")]
    DuplicateId { id: String },
    #[error("no tool call registered for `{id}`")]
    NotFound { id: String },
    #[error("tool call `{id}` was already resolved")]
    AlreadyResolved { id: String },
    #[error("tool call `{id}` was dropped before resolving")]
    Dropped { id: String },
}

#[derive(Debug)]
enum SlotState {
    Pending(oneshot::Sender<ToolOutcome>),
    Resolved,
}

#[derive(Debug)]
struct Slot {
    id: String,
    state: SlotState,
}

/// Awaitable result of one tool call.
#[derive(Debug)]
pub struct ToolCallPromise {
    id: String,
    rx: oneshot::Receiver<ToolOutcome>,
}

impl ToolCallPromise {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn wait(self) -> Result<ToolOutcome, ToolCallError> {
        self.rx
            .await
            .map_err(|_| ToolCallError::Dropped { id: self.id })
    }
}

#[derive(Debug, Default)]
pub struct ToolCallTable {
    slots: Vec<Slot>,
    index: HashMap<String, usize>,
}

impl ToolCallTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: &str) -> Result<ToolCallPromise, ToolCallError> {
        if self.index.contains_key(id) {
            return Err(ToolCallError::DuplicateId { id: id.to_string() });
        }
        let (tx, rx) = oneshot::channel();
        self.index.insert(id.to_string(), self.slots.len());
        self.slots.push(Slot {
            id: id.to_string(),
            state: SlotState::Pending(tx),
        });
        Ok(ToolCallPromise {
            id: id.to_string(),
            rx,
        })
    }

    #[must_use]
    pub fn is_registered(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    #[cfg(test)]
    fn is_pending(&self, id: &str) -> bool {
        self.index
            .get(id)
            .is_some_and(|&i| matches!(self.slots[i].state, SlotState::Pending(_)))
    }

    /// Resolve `id` with `outcome`. A dropped promise is not an error; the
    /// slot still counts as resolved.
    pub fn resolve(&mut self, id: &str, outcome: ToolOutcome) -> Result<(), ToolCallError> {
        let &i = self
            .index
            .get(id)
            .ok_or_else(|| ToolCallError::NotFound { id: id.to_string() })?;
        let slot = &mut self.slots[i];
        match mem::replace(&mut slot.state, SlotState::Resolved) {
            SlotState::Pending(tx) => {
                if tx.send(outcome).is_err() {
                    tracing::debug!(call_id = %id, "Tool call resolved after its waiter went away");
                }
                Ok(())
            }
            SlotState::Resolved => Err(ToolCallError::AlreadyResolved { id: id.to_string() }),
        }
    }

    /// Ids still waiting for a result, in registration order.
    #[must_use]
    pub fn pending_ids(&self) -> Vec<String> {
        self.slots
            .iter()
            .filter(|slot| matches!(slot.state, SlotState::Pending(_)))
            .map(|slot| slot.id.clone())
            .collect()
    }

    /// Resolve every pending slot with a clone of `outcome`. Returns how many.
    pub fn resolve_all_pending(&mut self, outcome: &ToolOutcome) -> usize {
        let ids = self.pending_ids();
        for id in &ids {
            let _ = self.resolve(id, outcome.clone());
        }
        ids.len()
    }
}
