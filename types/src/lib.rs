//! Core domain types for Shipwright.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the application.

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

mod action;
mod file_cache;
mod ids;
mod message;
mod model;
mod tool;

pub use action::{Action, ActionStatus, FileAction, InvalidAction, ToolAction};
pub use file_cache::{FileCache, FileEntry, normalize_path};
pub use ids::{ActionId, ArtifactId, ChatId, MessageId, PartId, SessionId};
pub use message::{Message, Part, Role, ToolInvocationPart, ToolInvocationState};
pub use model::{FinishReason, ModelEvent, ModelRequest, ModelStepEnd, ModelToolCall};
pub use tool::{
    DeployArgs, ERROR_PREFIX, EditArgs, NpmInstallArgs, ShellArgs, ToolDefinition,
    ToolInvocation, ToolName, ToolOutcome, UnknownToolError, ViewArgs, error_result,
    is_error_result,
};
