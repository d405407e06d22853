//! Background persistence for Shipwright.
//!
//! The [`SyncWorker`] watches conversation progress and the file change
//! counter, and uploads whatever lies past the last persisted watermarks as a
//! compressed [`SyncDelta`]. Failed uploads retry with exponential backoff.

mod backend;
mod backoff;
mod http;
mod payload;
mod state;
mod unload;
mod worker;

use std::io;

use thiserror::Error;

pub use backend::{BackendFut, MemoryBackend, PersistenceBackend};
pub use backoff::{BackoffConfig, MAX_JITTER_FACTOR};
pub use http::HttpBackend;
pub use payload::{SyncDelta, gunzip_json, gzip_json};
pub use state::SyncState;
pub use unload::{UnloadDecision, UnloadGuard};
pub use worker::{RoundOutcome, SyncConfig, SyncEvent, SyncTarget, SyncWorker};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("compression failed: {0}")]
    Compression(#[from] io::Error),
    #[error("upload rejected: {0}")]
    Rejected(String),
}
