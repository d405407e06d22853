//! Streaming parser for the artifact/action markup embedded in model output.
//!
//! - `StreamingParser` turns growing part text into lifecycle events
//! - `strip_markup` reduces assistant text to its prose
//! - `render_tool_invocation` maps tool invocation parts onto the same markup
//! - `validate` is where tool payloads become typed `ToolInvocation`s

mod extract;
mod parser;
mod render;
mod strip;
mod tags;
mod validate;

pub use extract::{extract_actions, first_artifact_title, written_paths};
pub use parser::{ActionKind, ParserEvent, StreamingParser};
pub use render::{part_markup, render_tool_invocation};
pub use strip::strip_markup;
pub use validate::{ValidationError, parse_invocation, validate_args};
