//! Execution core for Shipwright.
//!
//! The [`Workbench`] turns parser events into artifacts and runs their actions
//! one at a time against the sandbox host. The [`TurnLoop`] drives the model:
//! it builds context, streams replies into the [`Conversation`], and answers
//! tool calls through the workbench's promise table.

mod conversation;
mod files;
mod policy;
mod scheduler;
mod tool_calls;
mod turn;
mod workbench;

pub use conversation::{ChatProgress, Conversation, PartPosition};
pub use files::{DEFAULT_IGNORED_PREFIXES, FileChange, FileChangeTracker};
pub use policy::{ABORTED_RESULT, DEFAULT_MAX_CONSECUTIVE_FAILURES, ToolFailurePolicy};
pub use scheduler::{Clock, CoalescingScheduler, TokioClock};
pub use tool_calls::{ToolCallError, ToolCallPromise, ToolCallTable};
pub use turn::{
    ModelClient, ModelError, ModelFut, StopHandle, TurnError, TurnLoop, TurnOptions, TurnOutcome,
};
pub use workbench::{
    ActionRecord, Artifact, Workbench, WorkbenchError, WorkbenchEvent, WorkbenchOptions,
};
