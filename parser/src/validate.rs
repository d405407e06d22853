//! Schema validation for tool payloads.
//!
//! This is the only place loosely typed tool arguments become a
//! `ToolInvocation`. Everything downstream works with the typed union.

use serde_json::Value;
use shipwright_types::{ToolInvocation, ToolName};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Unknown tool `{0}`")]
    UnknownTool(String),
    #[error("Missing tool name")]
    MissingToolName,
    #[error("Invalid arguments for `{tool}`: {message}")]
    BadArgs { tool: ToolName, message: String },
    #[error("Malformed tool payload: {0}")]
    Payload(String),
}

/// Validate arguments against a JSON schema.
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), String> {
    let validator =
        jsonschema::validator_for(schema).map_err(|e| format!("Invalid tool schema: {e}"))?;
    validator.validate(args).map_err(|err| err.to_string())
}

/// Resolve a tool name, validate `args` against its schema, and build the
/// typed invocation.
pub fn parse_invocation(tool_name: &str, args: Value) -> Result<ToolInvocation, ValidationError> {
    if tool_name.is_empty() {
        return Err(ValidationError::MissingToolName);
    }
    let tool: ToolName = tool_name
        .parse()
        .map_err(|_| ValidationError::UnknownTool(tool_name.to_string()))?;

    validate_args(&tool.schema(), &args)
        .map_err(|message| ValidationError::BadArgs { tool, message })?;

    ToolInvocation::from_parts(tool, args).map_err(|e| ValidationError::BadArgs {
        tool,
        message: e.to_string(),
    })
}
