//! Actions extracted from streamed assistant output, and their status machine.

use serde::{Deserialize, Serialize};

use crate::tool::{ToolInvocation, ToolName};

/// Write (or overwrite) one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAction {
    pub path: String,
    pub content: String,
    /// The model declared this an edit of an existing file rather than a create.
    #[serde(default)]
    pub is_edit: bool,
}

/// Invoke a tool. Shell actions from markup are tool actions for `shell`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolAction {
    /// Correlation id of the model tool call this action answers. `None` for
    /// shell commands written directly in markup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    pub invocation: ToolInvocation,
    /// Set when the invocation already ran in an earlier session (history
    /// replay). The action is recorded complete without re-running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_result: Option<String>,
}

impl ToolAction {
    #[must_use]
    pub fn tool_name(&self) -> ToolName {
        self.invocation.name()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Action {
    File(FileAction),
    Tool(ToolAction),
}

impl Action {
    /// Path this action writes, if it writes one.
    #[must_use]
    pub fn written_path(&self) -> Option<&str> {
        match self {
            Action::File(file) => Some(&file.path),
            Action::Tool(tool) => tool.invocation.written_path(),
        }
    }

    #[must_use]
    pub fn call_id(&self) -> Option<&str> {
        match self {
            Action::File(_) => None,
            Action::Tool(tool) => tool.call_id.as_deref(),
        }
    }
}

/// An action whose payload could not be turned into a valid `Action`.
///
/// It still occupies its slot in the artifact's queue so ordering and
/// tool-call correlation are preserved; it goes straight to `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidAction {
    pub call_id: Option<String>,
    pub tool_name: Option<String>,
    pub message: String,
}

/// Execution status. Moves `Pending -> Running -> {Complete | Failed | Aborted}`,
/// or `Pending -> Aborted`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ActionStatus {
    Pending,
    Running,
    Complete,
    Failed { error: String },
    Aborted,
}

impl ActionStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionStatus::Complete | ActionStatus::Failed { .. } | ActionStatus::Aborted
        )
    }

    /// Whether `next` is a legal successor of `self`.
    #[must_use]
    pub fn can_transition_to(&self, next: &ActionStatus) -> bool {
        match (self, next) {
            (ActionStatus::Pending, ActionStatus::Running | ActionStatus::Aborted)
            | (
                ActionStatus::Running,
                ActionStatus::Complete | ActionStatus::Failed { .. } | ActionStatus::Aborted,
            ) => true,
            // Invalid actions and replayed results skip straight to a terminal state.
            (ActionStatus::Pending, ActionStatus::Failed { .. } | ActionStatus::Complete) => true,
            _ => false,
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Running => "running",
            ActionStatus::Complete => "complete",
            ActionStatus::Failed { .. } => "failed",
            ActionStatus::Aborted => "aborted",
        }
    }
}
