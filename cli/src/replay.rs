//! `shipwright replay`: run a transcript's actions and tabulate the outcome.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, RwLock};

use anyhow::Result;
use shipwright_config::ShipwrightConfig;
use shipwright_engine::{FileChangeTracker, Workbench};
use shipwright_parser::{StreamingParser, part_markup};
use shipwright_tools::{LocalSandboxHost, MemorySandboxHost, SandboxHost};
use shipwright_types::{ActionStatus, FileCache, Message, Part, Role, ToolInvocationState};

use crate::transcript;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub action: String,
    pub kind: &'static str,
    pub status: ActionStatus,
    pub detail: String,
}

#[derive(Debug, Default)]
pub struct ReplayReport {
    pub rows: Vec<Row>,
    pub file_counter: u64,
    pub tool_failures: u32,
}

impl ReplayReport {
    fn count(&self, label: &str) -> usize {
        self.rows
            .iter()
            .filter(|row| row.status.label() == label)
            .count()
    }
}

impl fmt::Display for ReplayReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .rows
            .iter()
            .map(|row| row.action.len())
            .max()
            .unwrap_or(0)
            .max("ACTION".len());
        writeln!(f, "{:<width$}  {:<8}  {:<9}  DETAIL", "ACTION", "KIND", "STATUS")?;
        for row in &self.rows {
            let detail = match &row.status {
                ActionStatus::Failed { error } => format!("{}: {error}", row.detail),
                _ => row.detail.clone(),
            };
            writeln!(
                f,
                "{:<width$}  {:<8}  {:<9}  {detail}",
                row.action,
                row.kind,
                row.status.label()
            )?;
        }
        writeln!(
            f,
            "\n{} actions: {} complete, {} failed, {} aborted, {} pending",
            self.rows.len(),
            self.count("complete"),
            self.count("failed"),
            self.count("aborted"),
            self.count("pending"),
        )?;
        writeln!(
            f,
            "file counter {}, consecutive tool failures {}",
            self.file_counter, self.tool_failures
        )
    }
}

pub async fn run(
    config: &ShipwrightConfig,
    root: &Path,
    messages: Vec<Message>,
    dry_run: bool,
) -> Result<ReplayReport> {
    let files = Arc::new(RwLock::new(FileCache::new()));
    let tracker = Arc::new(FileChangeTracker::new(files, config.ignored_prefixes()));
    transcript::load_tree(root, &tracker)?;

    let host: Arc<dyn SandboxHost> = if dry_run {
        Arc::new(MemorySandboxHost::new())
    } else {
        Arc::new(LocalSandboxHost::new(root))
    };
    let workbench = Workbench::new(host, Arc::clone(&tracker), config.workbench_options());
    Ok(replay(&workbench, &messages).await)
}

/// Feed every assistant part through one parser and wait for the queue.
pub async fn replay(workbench: &Workbench, messages: &[Message]) -> ReplayReport {
    let mut parser = StreamingParser::new();
    let mut promises = Vec::new();

    for message in messages.iter().filter(|m| m.role() == Role::Assistant) {
        for (index, part) in message.parts().iter().enumerate() {
            let part_id = message.part_id(index);
            if let Part::ToolInvocation { invocation } = part
                && invocation.state == ToolInvocationState::Call
            {
                match workbench.register_tool_call(&invocation.tool_call_id) {
                    Ok(promise) => promises.push(promise),
                    Err(e) => tracing::warn!(part_id = %part_id, "Skipping tool call: {e}"),
                }
            }
            if let Some(markup) = part_markup(&part_id, part) {
                workbench.apply_all(parser.parse(&part_id, &markup));
            }
        }
    }

    workbench.wait_idle().await;
    drop(promises);

    let rows = workbench
        .artifacts()
        .iter()
        .flat_map(|artifact| {
            artifact.actions().iter().map(|action| Row {
                action: action.id().to_string(),
                kind: action.kind().as_str(),
                status: action.status().clone(),
                detail: action.summary(),
            })
        })
        .collect();

    ReplayReport {
        rows,
        file_counter: workbench.tracker().counter(),
        tool_failures: workbench.consecutive_tool_failures(),
    }
}
