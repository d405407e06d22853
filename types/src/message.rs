//! Conversation message model.
//!
//! A `Message` is an ordered list of `Part`s. Constructors take `SystemTime`
//! explicitly; callers own the clock.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{MessageId, PartId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// Lifecycle of a tool invocation part.
///
/// Ordered: a part only ever moves forward through these states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolInvocationState {
    PartialCall,
    Call,
    Result,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocationPart {
    pub tool_call_id: String,
    pub tool_name: String,
    pub state: ToolInvocationState,
    #[serde(default)]
    pub args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl ToolInvocationPart {
    pub fn call(tool_call_id: impl Into<String>, tool_name: impl Into<String>, args: Value) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            state: ToolInvocationState::Call,
            args,
            result: None,
        }
    }

    /// Record the tool's result. Earlier states are never restored.
    pub fn complete(&mut self, result: impl Into<String>) {
        self.state = ToolInvocationState::Result;
        self.result = Some(result.into());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Part {
    Text {
        text: String,
    },
    ToolInvocation {
        #[serde(rename = "toolInvocation")]
        invocation: ToolInvocationPart,
    },
    Reasoning {
        text: String,
    },
    File {
        #[serde(rename = "mimeType")]
        mime_type: String,
        data: String,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    #[must_use]
    pub fn tool_invocation(invocation: ToolInvocationPart) -> Self {
        Part::ToolInvocation { invocation }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text { text } => Some(text),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_tool_invocation(&self) -> Option<&ToolInvocationPart> {
        match self {
            Part::ToolInvocation { invocation } => Some(invocation),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    id: MessageId,
    role: Role,
    parts: Vec<Part>,
    created_at: SystemTime,
}

impl Message {
    #[must_use]
    pub fn new(id: MessageId, role: Role, parts: Vec<Part>, created_at: SystemTime) -> Self {
        Self {
            id,
            role,
            parts,
            created_at,
        }
    }

    pub fn user(id: MessageId, text: impl Into<String>, created_at: SystemTime) -> Self {
        Self::new(id, Role::User, vec![Part::text(text)], created_at)
    }

    pub fn system(id: MessageId, text: impl Into<String>, created_at: SystemTime) -> Self {
        Self::new(id, Role::System, vec![Part::text(text)], created_at)
    }

    /// An assistant message with no parts yet; streaming appends to it.
    #[must_use]
    pub fn assistant(id: MessageId, created_at: SystemTime) -> Self {
        Self::new(id, Role::Assistant, Vec::new(), created_at)
    }

    #[must_use]
    pub fn id(&self) -> &MessageId {
        &self.id
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    #[must_use]
    pub fn part(&self, index: usize) -> Option<&Part> {
        self.parts.get(index)
    }

    pub fn part_mut(&mut self, index: usize) -> Option<&mut Part> {
        self.parts.get_mut(index)
    }

    #[must_use]
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    #[must_use]
    pub fn part_id(&self, index: usize) -> PartId {
        PartId::new(self.id.clone(), index)
    }

    /// Appends a part and returns its index.
    pub fn push_part(&mut self, part: Part) -> usize {
        self.parts.push(part);
        self.parts.len() - 1
    }

    /// Appends streamed text to the trailing text part, opening a new one if the
    /// last part is not text. Returns the index of the part that grew.
    pub fn append_text(&mut self, delta: &str) -> usize {
        if let Some(Part::Text { text }) = self.parts.last_mut() {
            text.push_str(delta);
            return self.parts.len() - 1;
        }
        self.push_part(Part::text(delta))
    }

    /// Concatenated text of all text parts.
    #[must_use]
    pub fn text_content(&self) -> String {
        self.parts
            .iter()
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join("")
    }
}
