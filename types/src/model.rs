//! Model invocation boundary types.
//!
//! The wire format is owned by whichever client implements the boundary; these
//! are the shapes the core produces and consumes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::Message;
use crate::tool::ToolDefinition;

/// Why the model stopped producing output for one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
}

/// A tool call requested by the model at the end of a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ModelToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// One request to the model.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    /// `None` when the previous step allowed skipping the system prompt.
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,
    /// Empty when tools are disabled for this turn.
    pub tools: Vec<ToolDefinition>,
}

/// Terminal item of a model response stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelStepEnd {
    pub finish_reason: FinishReason,
    pub tool_calls: Vec<ModelToolCall>,
}

/// Streamed item from the model.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    TextDelta(String),
    Finished(ModelStepEnd),
}
