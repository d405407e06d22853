//! Tool Executor Framework - sandbox host boundary, registry, and built-in tools.

pub mod builtins;
mod host;
mod local;
mod memory;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use shipwright_types::{FileCache, ToolDefinition, ToolInvocation, ToolName, error_result};

pub use host::{HostError, HostFut, ProcessHandle, ProcessOutput, SandboxHost};
pub use local::LocalSandboxHost;
pub use memory::MemorySandboxHost;

/// Tool execution future type alias.
pub type ToolFut<'a> = Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send + 'a>>;

/// Default cap on a tool result.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 32 * 1024;

/// Error types for tool execution.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Bad tool args: {message}")]
    BadArgs { message: String },
    #[error("Tool execution failed: {tool}: {message}")]
    ExecutionFailed { tool: ToolName, message: String },
    #[error("Unknown tool: {name}")]
    UnknownTool { name: ToolName },
    #[error("Duplicate tool registered: {name}")]
    DuplicateTool { name: ToolName },
    #[error(transparent)]
    Host(#[from] HostError),
}

/// Per-call tool context.
#[derive(Clone)]
pub struct ToolCtx {
    pub host: Arc<dyn SandboxHost>,
    /// Mirror of the sandbox filesystem, kept in step with writes.
    pub files: Arc<RwLock<FileCache>>,
    pub tool_call_id: Option<String>,
    pub max_output_bytes: usize,
    /// Program and arguments `deploy` runs.
    pub deploy_command: Vec<String>,
}

impl ToolCtx {
    pub fn new(host: Arc<dyn SandboxHost>, files: Arc<RwLock<FileCache>>) -> Self {
        Self {
            host,
            files,
            tool_call_id: None,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            deploy_command: default_deploy_command(),
        }
    }
}

#[must_use]
pub fn default_deploy_command() -> Vec<String> {
    vec!["npm".to_string(), "run".to_string(), "deploy".to_string()]
}

pub trait ToolExecutor: Send + Sync {
    fn name(&self) -> ToolName;
    fn description(&self) -> &'static str {
        self.name().description()
    }
    fn execute<'a>(&'a self, invocation: &'a ToolInvocation, ctx: &'a ToolCtx) -> ToolFut<'a>;
}

/// Tool registry, one executor per tool name.
#[derive(Default)]
pub struct ToolRegistry {
    executors: HashMap<ToolName, Box<dyn ToolExecutor>>,
}

impl ToolRegistry {
    /// A registry with every built-in tool.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::default();
        for executor in builtins::all() {
            // Built-in names are distinct.
            let _ = registry.register(executor);
        }
        registry
    }

    pub fn register(&mut self, executor: Box<dyn ToolExecutor>) -> Result<(), ToolError> {
        let name = executor.name();
        if self.executors.contains_key(&name) {
            return Err(ToolError::DuplicateTool { name });
        }
        self.executors.insert(name, executor);
        Ok(())
    }

    pub fn lookup(&self, name: ToolName) -> Result<&dyn ToolExecutor, ToolError> {
        self.executors
            .get(&name)
            .map(AsRef::as_ref)
            .ok_or(ToolError::UnknownTool { name })
    }

    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .executors
            .keys()
            .map(|name| name.definition())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Run `invocation` and render the outcome as a tool result string.
    ///
    /// Failures come back `"Error:"`-prefixed rather than as `Err`, since the
    /// result string is what the model sees either way.
    pub async fn execute(&self, invocation: &ToolInvocation, ctx: &ToolCtx) -> String {
        let name = invocation.name();
        let result = match self.lookup(name) {
            Ok(executor) => executor.execute(invocation, ctx).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(output) => truncate_output(output, ctx.max_output_bytes),
            Err(e) => {
                tracing::debug!(tool = %name, "Tool failed: {e}");
                truncate_output(error_result(e), ctx.max_output_bytes)
            }
        }
    }
}

/// Truncate tool output to the effective maximum length.
#[must_use]
pub fn truncate_output(output: String, effective_max: usize) -> String {
    if output.len() <= effective_max {
        return output;
    }
    let marker = "\n\n... [output truncated]";
    if effective_max <= marker.len() {
        return marker[..effective_max].to_string();
    }
    let max_body = effective_max - marker.len();
    let mut end = max_body;
    while end > 0 && !output.is_char_boundary(end) {
        end -= 1;
    }
    let mut truncated = output;
    truncated.truncate(end);
    truncated.push_str(marker);
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipwright_types::{ShellArgs, ViewArgs};

    fn ctx(host: MemorySandboxHost) -> ToolCtx {
        ToolCtx::new(Arc::new(host), Arc::new(RwLock::new(FileCache::new())))
    }

    #[test]
    fn truncate_output_keeps_char_boundaries() {
        let output = "é".repeat(40);
        let truncated = truncate_output(output, 30);
        assert!(truncated.len() <= 30);
        assert!(truncated.ends_with("[output truncated]"));
        assert_eq!(truncate_output("short".into(), 30), "short");
    }

    #[test]
    fn registry_rejects_duplicates() {
        let mut registry = ToolRegistry::with_builtins();
        let err = registry
            .register(Box::new(builtins::ShellTool))
            .unwrap_err();
        assert!(matches!(
            err,
            ToolError::DuplicateTool {
                name: ToolName::Shell
            }
        ));
        assert_eq!(registry.definitions().len(), ToolName::ALL.len());
    }

    #[tokio::test]
    async fn failures_render_with_error_prefix() {
        let registry = ToolRegistry::with_builtins();
        let ctx = ctx(MemorySandboxHost::new());
        let result = registry
            .execute(
                &ToolInvocation::View(ViewArgs {
                    path: "/nope.ts".into(),
                    view_range: None,
                }),
                &ctx,
            )
            .await;
        assert!(result.starts_with("Error:"), "{result}");
    }

    #[tokio::test]
    async fn unknown_tool_in_empty_registry() {
        let registry = ToolRegistry::default();
        let ctx = ctx(MemorySandboxHost::new());
        let result = registry
            .execute(
                &ToolInvocation::Shell(ShellArgs {
                    command: "ls".into(),
                }),
                &ctx,
            )
            .await;
        assert_eq!(result, "Error: Unknown tool: shell");
    }
}
