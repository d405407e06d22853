//! Markup rendering for tool invocation parts.
//!
//! A tool invocation part is fed through the same parser as assistant text by
//! rendering it to markup first. The artifact id is the part id, so the
//! artifact a tool call creates is addressable the same way a text part's is.

use std::borrow::Cow;

use serde_json::{Map, Value};
use shipwright_types::{Part, PartId, ToolInvocationPart, ToolInvocationState};

use crate::tags::{ACTION_CLOSE, ARTIFACT_CLOSE, escape_attribute};

/// Markup the parser should see for `part`, or `None` for parts that carry no
/// actions (reasoning, attachments).
#[must_use]
pub fn part_markup<'a>(part_id: &PartId, part: &'a Part) -> Option<Cow<'a, str>> {
    match part {
        Part::Text { text } => Some(Cow::Borrowed(text)),
        Part::ToolInvocation { invocation } => {
            Some(Cow::Owned(render_tool_invocation(part_id, invocation)))
        }
        Part::Reasoning { .. } | Part::File { .. } => None,
    }
}

/// Render a tool invocation as an artifact with a single `toolUse` action.
///
/// A `partial-call` renders only the opening tags, which are a prefix of the
/// rendering in every later state.
#[must_use]
pub fn render_tool_invocation(part_id: &PartId, invocation: &ToolInvocationPart) -> String {
    let mut out = format!(
        "<artifact id=\"{id}\" title=\"{title}\"><action type=\"toolUse\" toolName=\"{name}\" toolCallId=\"{call}\">",
        id = escape_attribute(&part_id.to_string()),
        title = escape_attribute(&invocation.tool_name),
        name = escape_attribute(&invocation.tool_name),
        call = escape_attribute(&invocation.tool_call_id),
    );
    if invocation.state == ToolInvocationState::PartialCall {
        return out;
    }

    let mut payload = Map::new();
    payload.insert(
        "toolName".to_string(),
        Value::String(invocation.tool_name.clone()),
    );
    payload.insert("args".to_string(), invocation.args.clone());
    let state = match invocation.state {
        ToolInvocationState::Result => "result",
        ToolInvocationState::PartialCall | ToolInvocationState::Call => "call",
    };
    payload.insert("state".to_string(), Value::String(state.to_string()));
    if let Some(result) = &invocation.result {
        payload.insert("result".to_string(), Value::String(result.clone()));
    }

    // `<` never appears raw in the payload, so neither closing tag can.
    let json = Value::Object(payload).to_string().replace('<', "\\u003c");
    out.push_str(&json);
    out.push_str(ACTION_CLOSE);
    out.push_str(ARTIFACT_CLOSE);
    out
}
