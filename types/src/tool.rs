//! Tool vocabulary: names, argument schemas, and the invocation tagged union.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

/// Results starting with this prefix are failures, for the UI and the
/// consecutive-failure policy alike.
pub const ERROR_PREFIX: &str = "Error:";

/// Render a failure as a tool result string.
pub fn error_result(message: impl fmt::Display) -> String {
    format!("{ERROR_PREFIX} {message}")
}

#[must_use]
pub fn is_error_result(result: &str) -> bool {
    result.starts_with(ERROR_PREFIX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    View,
    Edit,
    NpmInstall,
    Deploy,
    Shell,
}

#[derive(Debug, Error)]
#[error("unknown tool: {0}")]
pub struct UnknownToolError(pub String);

impl ToolName {
    pub const ALL: [ToolName; 5] = [
        ToolName::View,
        ToolName::Edit,
        ToolName::NpmInstall,
        ToolName::Deploy,
        ToolName::Shell,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ToolName::View => "view",
            ToolName::Edit => "edit",
            ToolName::NpmInstall => "npmInstall",
            ToolName::Deploy => "deploy",
            ToolName::Shell => "shell",
        }
    }

    /// Deploy-class tools: success lets the next turn skip the system prompt.
    #[must_use]
    pub const fn is_deploy(self) -> bool {
        matches!(self, ToolName::Deploy)
    }

    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            ToolName::View => "Read a file (optionally a 1-indexed line range) or list a directory.",
            ToolName::Edit => {
                "Replace exactly one occurrence of `old` with `new` in an existing file."
            }
            ToolName::NpmInstall => "Install space-separated npm packages into the project.",
            ToolName::Deploy => "Build and deploy the project, returning the deploy output.",
            ToolName::Shell => "Run a shell command in the project root.",
        }
    }

    /// JSON schema for this tool's arguments.
    #[must_use]
    pub fn schema(self) -> Value {
        match self {
            ToolName::View => json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "minLength": 1},
                    "viewRange": {
                        "type": "array",
                        "items": {"type": "integer"},
                        "minItems": 2,
                        "maxItems": 2
                    }
                },
                "required": ["path"],
                "additionalProperties": false
            }),
            ToolName::Edit => json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "minLength": 1},
                    "old": {"type": "string", "minLength": 1},
                    "new": {"type": "string"}
                },
                "required": ["path", "old", "new"],
                "additionalProperties": false
            }),
            ToolName::NpmInstall => json!({
                "type": "object",
                "properties": {
                    "packages": {"type": "string", "minLength": 1}
                },
                "required": ["packages"],
                "additionalProperties": false
            }),
            ToolName::Deploy => json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
            ToolName::Shell => json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string", "minLength": 1}
                },
                "required": ["command"],
                "additionalProperties": false
            }),
        }
    }

    #[must_use]
    pub fn definition(self) -> ToolDefinition {
        ToolDefinition::new(self.as_str(), self.description(), self.schema())
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = UnknownToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| UnknownToolError(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ViewArgs {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_range: Option<[i64; 2]>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EditArgs {
    pub path: String,
    pub old: String,
    pub new: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NpmInstallArgs {
    pub packages: String,
}

impl NpmInstallArgs {
    pub fn package_list(&self) -> impl Iterator<Item = &str> {
        self.packages.split_whitespace()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeployArgs {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShellArgs {
    pub command: String,
}

/// A validated tool call, one variant per tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "toolName", content = "args", rename_all = "camelCase")]
pub enum ToolInvocation {
    View(ViewArgs),
    Edit(EditArgs),
    NpmInstall(NpmInstallArgs),
    Deploy(DeployArgs),
    Shell(ShellArgs),
}

impl ToolInvocation {
    #[must_use]
    pub fn name(&self) -> ToolName {
        match self {
            ToolInvocation::View(_) => ToolName::View,
            ToolInvocation::Edit(_) => ToolName::Edit,
            ToolInvocation::NpmInstall(_) => ToolName::NpmInstall,
            ToolInvocation::Deploy(_) => ToolName::Deploy,
            ToolInvocation::Shell(_) => ToolName::Shell,
        }
    }

    /// Build from a tool name and loosely typed arguments.
    ///
    /// This only checks shape through serde; schema validation happens where
    /// actions are parsed.
    pub fn from_parts(name: ToolName, args: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(json!({ "toolName": name.as_str(), "args": args }))
    }

    /// The file path this invocation writes, if any.
    #[must_use]
    pub fn written_path(&self) -> Option<&str> {
        match self {
            ToolInvocation::Edit(args) => Some(&args.path),
            _ => None,
        }
    }
}

/// A tool definition sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the tool's parameters.
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Value a pending tool call resolves with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub result: String,
    /// Consecutive failures reached the threshold; stop offering tools.
    pub should_disable_tools: bool,
    /// A deploy just succeeded; the next request may omit the system prompt.
    pub skip_system_prompt: bool,
}

impl ToolOutcome {
    #[must_use]
    pub fn is_error(&self) -> bool {
        is_error_result(&self.result)
    }
}
