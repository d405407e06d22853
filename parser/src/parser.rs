//! Incremental artifact/action parser.
//!
//! `StreamingParser::parse` is called with the cumulative text of one part each
//! time it grows. State is kept per part, so every call only scans the new
//! suffix plus whatever tag was still incomplete last time. Decisions are made
//! only on complete tags, so feeding a buffer one character at a time yields the
//! same lifecycle events as feeding it whole.

use std::collections::HashMap;

use serde_json::Value;
use shipwright_types::{
    Action, ActionId, ArtifactId, FileAction, InvalidAction, PartId, ToolAction, error_result,
    normalize_path,
};

use crate::tags::{
    ACTION_CLOSE, ACTION_OPEN, ARTIFACT_CLOSE, ARTIFACT_OPEN, Attributes, TagMatch,
    match_literal, match_open_tag, partial_suffix_len,
};
use crate::validate::{ValidationError, parse_invocation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    File,
    Shell,
    ToolUse,
}

impl ActionKind {
    fn from_attribute(value: &str) -> Option<Self> {
        match value {
            "file" => Some(ActionKind::File),
            "shell" => Some(ActionKind::Shell),
            "toolUse" => Some(ActionKind::ToolUse),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ActionKind::File => "file",
            ActionKind::Shell => "shell",
            ActionKind::ToolUse => "toolUse",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParserEvent {
    ArtifactOpen {
        part_id: PartId,
        artifact_id: ArtifactId,
        title: String,
    },
    ActionOpen {
        part_id: PartId,
        action_id: ActionId,
        kind: ActionKind,
        /// Target path of a file action.
        path: Option<String>,
    },
    /// Content of an open file action so far. Emitted only when it grew.
    ActionStream {
        part_id: PartId,
        action_id: ActionId,
        content: String,
    },
    ActionClose {
        part_id: PartId,
        action_id: ActionId,
        action: Result<Action, InvalidAction>,
    },
    ArtifactClose {
        part_id: PartId,
        artifact_id: ArtifactId,
    },
}

impl ParserEvent {
    #[must_use]
    pub fn part_id(&self) -> &PartId {
        match self {
            ParserEvent::ArtifactOpen { part_id, .. }
            | ParserEvent::ActionOpen { part_id, .. }
            | ParserEvent::ActionStream { part_id, .. }
            | ParserEvent::ActionClose { part_id, .. }
            | ParserEvent::ArtifactClose { part_id, .. } => part_id,
        }
    }

    /// Streaming previews are advisory; everything else is a lifecycle event.
    #[must_use]
    pub fn is_lifecycle(&self) -> bool {
        !matches!(self, ParserEvent::ActionStream { .. })
    }
}

#[derive(Debug)]
struct OpenAction {
    id: ActionId,
    kind: ActionKind,
    attributes: Attributes,
    content_start: usize,
    streamed_len: usize,
}

#[derive(Debug, Default)]
struct PartState {
    position: usize,
    next_ordinal: usize,
    artifact: Option<ArtifactId>,
    action: Option<OpenAction>,
}

/// One parser serves every part of a conversation.
#[derive(Debug, Default)]
pub struct StreamingParser {
    parts: HashMap<PartId, PartState>,
}

impl StreamingParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the cumulative text of `part_id` and return the events not yet
    /// reported for it.
    pub fn parse(&mut self, part_id: &PartId, input: &str) -> Vec<ParserEvent> {
        let state = self.parts.entry(part_id.clone()).or_default();
        if input.len() < state.position || !input.is_char_boundary(state.position) {
            tracing::warn!(
                %part_id,
                position = state.position,
                len = input.len(),
                "Part text no longer extends the parsed prefix; ignoring"
            );
            return Vec::new();
        }

        let mut events = Vec::new();
        loop {
            let progressed = if state.action.is_some() {
                step_in_action(part_id, state, input, &mut events)
            } else if state.artifact.is_some() {
                step_in_artifact(part_id, state, input, &mut events)
            } else {
                step_outside(part_id, state, input, &mut events)
            };
            if !progressed {
                break;
            }
        }
        events
    }

    /// Whether `part_id` has an artifact or action that has not closed yet.
    #[must_use]
    pub fn is_open(&self, part_id: &PartId) -> bool {
        self.parts
            .get(part_id)
            .is_some_and(|state| state.artifact.is_some() || state.action.is_some())
    }

    /// Forget all per-part state.
    pub fn reset(&mut self) {
        self.parts.clear();
    }
}

/// Scan prose outside any artifact. Only an artifact opening tag matters here.
fn step_outside(
    part_id: &PartId,
    state: &mut PartState,
    input: &str,
    events: &mut Vec<ParserEvent>,
) -> bool {
    let Some(at) = next_tag_start(input, state.position) else {
        state.position = input.len();
        return false;
    };
    match match_open_tag(input, at, ARTIFACT_OPEN) {
        TagMatch::Complete { end, attributes } => {
            let artifact_id = attributes
                .get("id")
                .filter(|id| !id.is_empty())
                .map_or_else(|| ArtifactId::new(part_id.to_string()), ArtifactId::new);
            let title = attributes.get("title").unwrap_or_default().to_string();
            tracing::debug!(%part_id, %artifact_id, "Artifact opened");
            events.push(ParserEvent::ArtifactOpen {
                part_id: part_id.clone(),
                artifact_id: artifact_id.clone(),
                title,
            });
            state.artifact = Some(artifact_id);
            state.position = end;
            true
        }
        TagMatch::Incomplete => {
            state.position = at;
            false
        }
        TagMatch::NoMatch => {
            state.position = at + 1;
            true
        }
    }
}

/// Scan inside an open artifact for an action opening or the artifact close.
/// Anything else is inert.
fn step_in_artifact(
    part_id: &PartId,
    state: &mut PartState,
    input: &str,
    events: &mut Vec<ParserEvent>,
) -> bool {
    let Some(at) = next_tag_start(input, state.position) else {
        state.position = input.len();
        return false;
    };

    let close = match_literal(input, at, ARTIFACT_CLOSE);
    if let TagMatch::Complete { end, .. } = close {
        if let Some(artifact_id) = state.artifact.take() {
            tracing::debug!(%part_id, %artifact_id, "Artifact closed");
            events.push(ParserEvent::ArtifactClose {
                part_id: part_id.clone(),
                artifact_id,
            });
        }
        state.position = end;
        return true;
    }

    match match_open_tag(input, at, ACTION_OPEN) {
        TagMatch::Complete { end, attributes } => {
            state.position = end;
            let Some(kind) = attributes.get("type").and_then(ActionKind::from_attribute) else {
                tracing::debug!(%part_id, "Skipping action of unknown type");
                return true;
            };
            let action_id = ActionId::new(part_id.clone(), state.next_ordinal);
            state.next_ordinal += 1;
            let path = match kind {
                ActionKind::File => attributes.get("path").map(normalize_path),
                ActionKind::Shell | ActionKind::ToolUse => None,
            };
            events.push(ParserEvent::ActionOpen {
                part_id: part_id.clone(),
                action_id: action_id.clone(),
                kind,
                path,
            });
            state.action = Some(OpenAction {
                id: action_id,
                kind,
                attributes,
                content_start: end,
                streamed_len: 0,
            });
            true
        }
        TagMatch::Incomplete => {
            state.position = at;
            false
        }
        TagMatch::NoMatch if close == TagMatch::Incomplete => {
            state.position = at;
            false
        }
        TagMatch::NoMatch => {
            state.position = at + 1;
            true
        }
    }
}

/// Scan an open action's body for its closing tag, streaming file content
/// that is certain not to be part of that tag.
fn step_in_action(
    part_id: &PartId,
    state: &mut PartState,
    input: &str,
    events: &mut Vec<ParserEvent>,
) -> bool {
    let Some(open) = state.action.as_mut() else {
        return false;
    };

    if let Some(offset) = input[state.position..].find(ACTION_CLOSE) {
        let content_end = state.position + offset;
        let content = &input[open.content_start..content_end];
        let action = build_action(part_id, open, content);
        if let Err(invalid) = &action {
            tracing::warn!(%part_id, action_id = %open.id, error = %invalid.message, "Invalid action");
        }
        events.push(ParserEvent::ActionClose {
            part_id: part_id.clone(),
            action_id: open.id.clone(),
            action,
        });
        state.action = None;
        state.position = content_end + ACTION_CLOSE.len();
        return true;
    }

    let visible_end = input.len() - partial_suffix_len(input, ACTION_CLOSE);
    let visible_end = visible_end.max(state.position);
    if open.kind == ActionKind::File && visible_end > open.content_start + open.streamed_len {
        let raw = &input[open.content_start..visible_end];
        open.streamed_len = raw.len();
        let content = file_content(raw);
        if !content.is_empty() {
            events.push(ParserEvent::ActionStream {
                part_id: part_id.clone(),
                action_id: open.id.clone(),
                content: content.to_string(),
            });
        }
    }
    state.position = visible_end;
    false
}

fn next_tag_start(input: &str, from: usize) -> Option<usize> {
    input[from..].find('<').map(|offset| from + offset)
}

/// File bodies conventionally start on the line after the opening tag.
fn file_content(raw: &str) -> &str {
    raw.strip_prefix('\n').unwrap_or(raw)
}

fn build_action(
    part_id: &PartId,
    open: &OpenAction,
    content: &str,
) -> Result<Action, InvalidAction> {
    match open.kind {
        ActionKind::File => {
            let Some(path) = open.attributes.get("path").filter(|p| !p.trim().is_empty()) else {
                return Err(InvalidAction {
                    call_id: None,
                    tool_name: None,
                    message: error_result("File action is missing a path"),
                });
            };
            Ok(Action::File(FileAction {
                path: normalize_path(path),
                content: file_content(content).to_string(),
                is_edit: open.attributes.get("edit") == Some("true"),
            }))
        }
        ActionKind::Shell => {
            let call_id = open.attributes.get("toolCallId").map(str::to_string);
            let command = content.trim();
            if command.is_empty() {
                return Err(InvalidAction {
                    call_id,
                    tool_name: Some("shell".to_string()),
                    message: error_result("Shell action has no command"),
                });
            }
            let invocation = parse_invocation("shell", serde_json::json!({ "command": command }))
                .map_err(|e| invalid(call_id.clone(), Some("shell"), &e))?;
            Ok(Action::Tool(ToolAction {
                call_id,
                invocation,
                prior_result: None,
            }))
        }
        ActionKind::ToolUse => build_tool_use(part_id, open, content),
    }
}

fn build_tool_use(
    part_id: &PartId,
    open: &OpenAction,
    content: &str,
) -> Result<Action, InvalidAction> {
    let payload: Value = match serde_json::from_str(content.trim()) {
        Ok(value) => value,
        Err(e) => {
            let call_id = open.attributes.get("toolCallId").map(str::to_string);
            let tool_name = open.attributes.get("toolName");
            return Err(invalid(
                call_id,
                tool_name,
                &ValidationError::Payload(e.to_string()),
            ));
        }
    };

    let tool_name = open
        .attributes
        .get("toolName")
        .or_else(|| payload.get("toolName").and_then(Value::as_str))
        .unwrap_or_default();
    let call_id = open
        .attributes
        .get("toolCallId")
        .or_else(|| payload.get("toolCallId").and_then(Value::as_str))
        .filter(|id| !id.is_empty())
        .map(str::to_string);
    let args = payload
        .get("args")
        .cloned()
        .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
    let prior_result = match payload.get("state").and_then(Value::as_str) {
        Some("result") => payload
            .get("result")
            .map(|result| match result {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            }),
        _ => None,
    };

    let invocation = parse_invocation(tool_name, args).map_err(|e| {
        invalid(
            call_id.clone(),
            Some(tool_name).filter(|n| !n.is_empty()),
            &e,
        )
    })?;
    tracing::debug!(%part_id, call_id = ?call_id, tool = %invocation.name(), "Tool action parsed");
    Ok(Action::Tool(ToolAction {
        call_id,
        invocation,
        prior_result,
    }))
}

fn invalid(call_id: Option<String>, tool_name: Option<&str>, err: &ValidationError) -> InvalidAction {
    InvalidAction {
        call_id,
        tool_name: tool_name.map(str::to_string),
        message: error_result(err),
    }
}
