//! The remote persistence boundary.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};

use shipwright_types::ChatId;

use crate::SyncError;
use crate::payload::SyncDelta;

/// Backend operation future type alias.
pub type BackendFut<'a, T> = Pin<Box<dyn Future<Output = Result<T, SyncError>> + Send + 'a>>;

pub trait PersistenceBackend: Send + Sync {
    /// Store one delta. The whole delta lands or none of it does.
    fn upload<'a>(&'a self, delta: &'a SyncDelta) -> BackendFut<'a, ()>;

    /// Reserve a human-friendly id for the chat, derived from `hint`.
    fn allocate_id<'a>(&'a self, chat_id: &'a ChatId, hint: &'a str) -> BackendFut<'a, String>;
}

/// Backend that keeps uploads in memory. Failures can be queued up front.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    uploads: Mutex<Vec<SyncDelta>>,
    allocations: Mutex<Vec<String>>,
    failures_left: Mutex<u32>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `n` uploads.
    pub fn fail_next(&self, n: u32) {
        *self
            .failures_left
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = n;
    }

    #[must_use]
    pub fn uploads(&self) -> Vec<SyncDelta> {
        self.uploads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn allocations(&self) -> Vec<String> {
        self.allocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn slugify(hint: &str) -> String {
    let mut slug = String::new();
    for c in hint.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

impl PersistenceBackend for MemoryBackend {
    fn upload<'a>(&'a self, delta: &'a SyncDelta) -> BackendFut<'a, ()> {
        Box::pin(async move {
            {
                let mut left = self
                    .failures_left
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                if *left > 0 {
                    *left -= 1;
                    return Err(SyncError::Rejected("injected failure".to_string()));
                }
            }
            self.uploads
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(delta.clone());
            Ok(())
        })
    }

    fn allocate_id<'a>(&'a self, _chat_id: &'a ChatId, hint: &'a str) -> BackendFut<'a, String> {
        Box::pin(async move {
            let id = slugify(hint);
            self.allocations
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(id.clone());
            Ok(id)
        })
    }
}
