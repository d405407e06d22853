//! The workbench: artifacts, their actions, and the execution queue.
//!
//! Parser events land here. Artifacts are keyed by the part that produced
//! them and keep their actions in arrival order. Closed actions are queued on
//! one global FIFO drained by a single worker task, so nothing runs
//! concurrently with anything else and each action runs at most once.
//!
//! Streamed file content skips the queue and goes straight into the editable
//! buffer for its path; the queued write is authoritative.
//!
//! Tool actions carrying a correlation id wait for the model step to register
//! its promise before they start, and the queue resolves that promise when
//! they finish.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use shipwright_parser::{ActionKind, ParserEvent};
use shipwright_tools::{
    DEFAULT_MAX_OUTPUT_BYTES, SandboxHost, ToolCtx, ToolRegistry, default_deploy_command,
};
use shipwright_types::{
    Action, ActionId, ActionStatus, ArtifactId, FileAction, InvalidAction, PartId, ToolAction,
    ToolDefinition, ToolInvocation, ToolName, error_result, is_error_result, normalize_path,
};
use thiserror::Error;
use tokio::sync::{Notify, broadcast, mpsc, watch};

use crate::files::{FileChange, FileChangeTracker};
use crate::policy::{DEFAULT_MAX_CONSECUTIVE_FAILURES, ToolFailurePolicy};
use crate::tool_calls::{ToolCallError, ToolCallPromise, ToolCallTable};

const EVENT_CAPACITY: usize = 256;
const PACKAGE_JSON: &str = "/package.json";

#[derive(Debug, Error)]
pub enum WorkbenchError {
    #[error("no artifact for part {part_id}")]
    ArtifactNotFound { part_id: PartId },
    #[error("no action {action_id}")]
    ActionNotFound { action_id: ActionId },
}

#[derive(Debug, Clone)]
pub struct WorkbenchOptions {
    /// Run `npm install` after `package.json` is written.
    pub install_on_package_json: bool,
    pub max_consecutive_tool_failures: u32,
    pub max_tool_output_bytes: usize,
    pub deploy_command: Vec<String>,
}

impl Default for WorkbenchOptions {
    fn default() -> Self {
        Self {
            install_on_package_json: true,
            max_consecutive_tool_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            max_tool_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            deploy_command: default_deploy_command(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkbenchEvent {
    ArtifactOpened {
        part_id: PartId,
        artifact_id: ArtifactId,
        title: String,
    },
    ArtifactClosed {
        part_id: PartId,
    },
    ActionStatusChanged {
        action_id: ActionId,
        status: ActionStatus,
    },
    /// Streamed content replaced the editable buffer for `path`.
    BufferUpdated {
        path: String,
    },
    FileWritten {
        path: String,
    },
    InstallFinished {
        success: bool,
    },
    Aborted {
        actions: usize,
        tool_calls: usize,
    },
}

/// One action and its execution state.
#[derive(Debug, Clone)]
pub struct ActionRecord {
    id: ActionId,
    kind: ActionKind,
    path: Option<String>,
    /// `None` until the action closes.
    action: Option<Result<Action, InvalidAction>>,
    status: ActionStatus,
    executed: bool,
    result: Option<String>,
}

impl ActionRecord {
    #[must_use]
    pub fn id(&self) -> &ActionId {
        &self.id
    }

    #[must_use]
    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    #[must_use]
    pub fn status(&self) -> &ActionStatus {
        &self.status
    }

    #[must_use]
    pub fn executed(&self) -> bool {
        self.executed
    }

    #[must_use]
    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    #[must_use]
    pub fn action(&self) -> Option<&Result<Action, InvalidAction>> {
        self.action.as_ref()
    }

    /// One-line description for listings.
    #[must_use]
    pub fn summary(&self) -> String {
        match &self.action {
            Some(Ok(Action::File(file))) => format!("write {}", file.path),
            Some(Ok(Action::Tool(tool))) => match &tool.invocation {
                ToolInvocation::Shell(args) => format!("$ {}", args.command),
                invocation => invocation.name().to_string(),
            },
            Some(Err(invalid)) => invalid.message.clone(),
            None => match &self.path {
                Some(path) => format!("write {path} (streaming)"),
                None => format!("{} (streaming)", self.kind.as_str()),
            },
        }
    }

    fn set_status(&mut self, status: ActionStatus) -> bool {
        if !self.status.can_transition_to(&status) {
            tracing::warn!(
                action_id = %self.id,
                from = self.status.label(),
                to = status.label(),
                "Rejected action status transition"
            );
            return false;
        }
        self.status = status;
        true
    }
}

/// Execution-facing projection of one assistant part.
#[derive(Debug, Clone)]
pub struct Artifact {
    part_id: PartId,
    id: ArtifactId,
    title: String,
    closed: bool,
    actions: Vec<ActionRecord>,
}

impl Artifact {
    #[must_use]
    pub fn part_id(&self) -> &PartId {
        &self.part_id
    }

    #[must_use]
    pub fn id(&self) -> &ArtifactId {
        &self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    #[must_use]
    pub fn actions(&self) -> &[ActionRecord] {
        &self.actions
    }
}

#[derive(Debug, Default)]
struct State {
    artifacts: HashMap<PartId, Artifact>,
    order: Vec<PartId>,
    buffers: HashMap<String, String>,
    /// Bumped by every abort; jobs queued under an older generation are dead.
    generation: u64,
}

impl State {
    fn record_mut(&mut self, id: &ActionId) -> Result<&mut ActionRecord, WorkbenchError> {
        self.artifacts
            .get_mut(id.part_id())
            .and_then(|artifact| artifact.actions.iter_mut().find(|a| a.id == *id))
            .ok_or_else(|| WorkbenchError::ActionNotFound {
                action_id: id.clone(),
            })
    }
}

#[derive(Debug)]
struct Job {
    action_id: ActionId,
    generation: u64,
}

/// What the worker does with a claimed action.
enum Dispatch {
    Run(Action),
    /// Reaches a terminal status without running.
    Settle {
        tool: Option<ToolName>,
        result: String,
        resolve: bool,
    },
}

struct Shared {
    state: Mutex<State>,
    calls: Mutex<ToolCallTable>,
    registered: Notify,
    policy: Mutex<ToolFailurePolicy>,
    tracker: Arc<FileChangeTracker>,
    registry: ToolRegistry,
    ctx: ToolCtx,
    options: WorkbenchOptions,
    events: broadcast::Sender<WorkbenchEvent>,
    abort: watch::Sender<u64>,
    outstanding: AtomicUsize,
    idle: Notify,
}

#[derive(Clone)]
pub struct Workbench {
    shared: Arc<Shared>,
    queue: mpsc::UnboundedSender<Job>,
}

impl Workbench {
    /// Create a workbench and start its queue worker. Must be called within a
    /// tokio runtime.
    pub fn new(
        host: Arc<dyn SandboxHost>,
        tracker: Arc<FileChangeTracker>,
        options: WorkbenchOptions,
    ) -> Self {
        Self::with_registry(host, tracker, options, ToolRegistry::with_builtins())
    }

    pub fn with_registry(
        host: Arc<dyn SandboxHost>,
        tracker: Arc<FileChangeTracker>,
        options: WorkbenchOptions,
        registry: ToolRegistry,
    ) -> Self {
        let mut ctx = ToolCtx::new(host, Arc::clone(tracker.files()));
        ctx.max_output_bytes = options.max_tool_output_bytes;
        ctx.deploy_command.clone_from(&options.deploy_command);

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (abort, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            state: Mutex::new(State::default()),
            calls: Mutex::new(ToolCallTable::new()),
            registered: Notify::new(),
            policy: Mutex::new(ToolFailurePolicy::new(options.max_consecutive_tool_failures)),
            tracker,
            registry,
            ctx,
            options,
            events,
            abort,
            outstanding: AtomicUsize::new(0),
            idle: Notify::new(),
        });

        let (queue, jobs) = mpsc::unbounded_channel();
        tokio::spawn(run_queue(Arc::clone(&shared), jobs));
        Self { shared, queue }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<WorkbenchEvent> {
        self.shared.events.subscribe()
    }

    #[must_use]
    pub fn tracker(&self) -> &Arc<FileChangeTracker> {
        &self.shared.tracker
    }

    #[must_use]
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.shared.registry.definitions()
    }

    /// Register the promise for a model tool call. The matching action will
    /// not start before this.
    pub fn register_tool_call(&self, call_id: &str) -> Result<ToolCallPromise, ToolCallError> {
        let promise = self.shared.calls().register(call_id)?;
        self.shared.registered.notify_waiters();
        Ok(promise)
    }

    /// Apply one parser event. Consistency errors are logged and returned.
    pub fn apply(&self, event: ParserEvent) -> Result<(), WorkbenchError> {
        let result = self.apply_inner(event);
        if let Err(e) = &result {
            tracing::error!("Workbench consistency error: {e}");
        }
        result
    }

    /// Apply events in order. A failing event does not stop the rest.
    pub fn apply_all(&self, events: impl IntoIterator<Item = ParserEvent>) -> usize {
        events
            .into_iter()
            .filter_map(|event| self.apply(event).err())
            .count()
    }

    fn apply_inner(&self, event: ParserEvent) -> Result<(), WorkbenchError> {
        let mut state = self.shared.state();
        match event {
            ParserEvent::ArtifactOpen {
                part_id,
                artifact_id,
                title,
            } => {
                if let Some(existing) = state.artifacts.get_mut(&part_id) {
                    tracing::debug!(%part_id, "Merging artifact into existing part artifact");
                    existing.closed = false;
                    return Ok(());
                }
                state.order.push(part_id.clone());
                state.artifacts.insert(
                    part_id.clone(),
                    Artifact {
                        part_id: part_id.clone(),
                        id: artifact_id.clone(),
                        title: title.clone(),
                        closed: false,
                        actions: Vec::new(),
                    },
                );
                self.shared.emit(WorkbenchEvent::ArtifactOpened {
                    part_id,
                    artifact_id,
                    title,
                });
            }
            ParserEvent::ActionOpen {
                part_id,
                action_id,
                kind,
                path,
            } => {
                let artifact = state
                    .artifacts
                    .get_mut(&part_id)
                    .ok_or_else(|| WorkbenchError::ArtifactNotFound {
                        part_id: part_id.clone(),
                    })?;
                if artifact.actions.iter().any(|a| a.id == action_id) {
                    return Ok(());
                }
                artifact.actions.push(ActionRecord {
                    id: action_id.clone(),
                    kind,
                    path,
                    action: None,
                    status: ActionStatus::Pending,
                    executed: false,
                    result: None,
                });
                self.shared.emit(WorkbenchEvent::ActionStatusChanged {
                    action_id,
                    status: ActionStatus::Pending,
                });
            }
            ParserEvent::ActionStream {
                action_id, content, ..
            } => {
                let record = state.record_mut(&action_id)?;
                if record.executed
                    || record.status.is_terminal()
                    || record.kind != ActionKind::File
                {
                    return Ok(());
                }
                let Some(path) = record.path.clone() else {
                    return Ok(());
                };
                state.buffers.insert(path.clone(), content);
                self.shared.emit(WorkbenchEvent::BufferUpdated { path });
            }
            ParserEvent::ActionClose {
                action_id, action, ..
            } => {
                let generation = state.generation;
                let record = state.record_mut(&action_id)?;
                if record.action.is_some() {
                    return Ok(());
                }
                let final_buffer = match &action {
                    Ok(Action::File(file)) => Some((file.path.clone(), file.content.clone())),
                    _ => None,
                };
                record.action = Some(action);
                if record.status != ActionStatus::Pending {
                    return Ok(());
                }
                if let Some((path, content)) = final_buffer {
                    state.buffers.insert(path.clone(), content);
                    self.shared.emit(WorkbenchEvent::BufferUpdated { path });
                }
                self.shared.outstanding.fetch_add(1, Ordering::SeqCst);
                if self
                    .queue
                    .send(Job {
                        action_id: action_id.clone(),
                        generation,
                    })
                    .is_err()
                {
                    self.shared.finish_job();
                    tracing::warn!(%action_id, "Action queue is closed; action not executed");
                }
            }
            ParserEvent::ArtifactClose { part_id, .. } => {
                let artifact = state
                    .artifacts
                    .get_mut(&part_id)
                    .ok_or_else(|| WorkbenchError::ArtifactNotFound {
                        part_id: part_id.clone(),
                    })?;
                artifact.closed = true;
                self.shared.emit(WorkbenchEvent::ArtifactClosed { part_id });
            }
        }
        Ok(())
    }

    /// Mark every pending or running action aborted and fail every
    /// outstanding tool call. Returns the number of actions aborted.
    pub fn abort_all(&self) -> usize {
        let shared = &self.shared;
        let mut state = shared.state();
        state.generation += 1;
        let generation = state.generation;

        let mut aborted = Vec::new();
        for part_id in &state.order.clone() {
            let Some(artifact) = state.artifacts.get_mut(part_id) else {
                continue;
            };
            for record in &mut artifact.actions {
                if !record.status.is_terminal() && record.set_status(ActionStatus::Aborted) {
                    aborted.push(record.id.clone());
                }
            }
        }

        let outcome = shared.policy().aborted();
        let tool_calls = shared.calls().resolve_all_pending(&outcome);
        drop(state);

        shared.abort.send_replace(generation);
        for action_id in &aborted {
            shared.emit(WorkbenchEvent::ActionStatusChanged {
                action_id: action_id.clone(),
                status: ActionStatus::Aborted,
            });
        }
        shared.emit(WorkbenchEvent::Aborted {
            actions: aborted.len(),
            tool_calls,
        });
        tracing::info!(actions = aborted.len(), tool_calls, "Aborted all actions");
        aborted.len()
    }

    /// Wait until every queued action has been processed.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            if self.shared.outstanding.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Artifacts in the order they were opened.
    #[must_use]
    pub fn artifacts(&self) -> Vec<Artifact> {
        let state = self.shared.state();
        state
            .order
            .iter()
            .filter_map(|id| state.artifacts.get(id).cloned())
            .collect()
    }

    #[must_use]
    pub fn action(&self, id: &ActionId) -> Option<ActionRecord> {
        self.shared.state().record_mut(id).ok().cloned()
    }

    /// Current editable buffer content for `path`.
    #[must_use]
    pub fn buffer(&self, path: &str) -> Option<String> {
        self.shared.state().buffers.get(&normalize_path(path)).cloned()
    }

    #[must_use]
    pub fn consecutive_tool_failures(&self) -> u32 {
        self.shared.policy().consecutive_failures()
    }
}

async fn run_queue(shared: Arc<Shared>, mut jobs: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = jobs.recv().await {
        shared.run_job(job).await;
        shared.finish_job();
    }
    tracing::debug!("Action queue closed");
}

fn call_id_to_await(action: &Result<Action, InvalidAction>) -> Option<String> {
    match action {
        Ok(Action::Tool(ToolAction {
            call_id,
            prior_result: None,
            ..
        })) => call_id.clone(),
        Err(invalid) => invalid.call_id.clone(),
        Ok(_) => None,
    }
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn calls(&self) -> MutexGuard<'_, ToolCallTable> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn policy(&self) -> MutexGuard<'_, ToolFailurePolicy> {
        self.policy.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: WorkbenchEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn finish_job(&self) {
        if self.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    async fn run_job(&self, job: Job) {
        let call_id = {
            let mut state = self.state();
            if state.generation != job.generation {
                return;
            }
            match state.record_mut(&job.action_id) {
                Ok(record) => record.action.as_ref().and_then(call_id_to_await),
                Err(e) => {
                    tracing::error!("Workbench consistency error: {e}");
                    return;
                }
            }
        };

        if let Some(id) = &call_id
            && !self.wait_registered(id, job.generation).await
        {
            tracing::debug!(
                action_id = %job.action_id,
                "Aborted while waiting for tool call registration"
            );
            return;
        }

        let Some(dispatch) = self.claim(&job) else {
            return;
        };
        let (tool, result, resolve) = match dispatch {
            Dispatch::Settle {
                tool,
                result,
                resolve,
            } => (tool, result, resolve),
            Dispatch::Run(Action::File(file)) => (None, self.write_file(&file).await, false),
            Dispatch::Run(Action::Tool(tool)) => {
                let result = self.run_tool(&tool).await;
                (Some(tool.tool_name()), result, tool.call_id.is_some())
            }
        };
        self.finish(&job.action_id, call_id.as_deref().filter(|_| resolve), tool, result);
    }

    /// Block until `id` is registered. False if an abort came first.
    async fn wait_registered(&self, id: &str, generation: u64) -> bool {
        let mut abort = self.abort.subscribe();
        loop {
            let notified = self.registered.notified();
            if self.calls().is_registered(id) {
                return true;
            }
            if *abort.borrow_and_update() != generation {
                return false;
            }
            tracing::debug!(call_id = %id, "Waiting for tool call registration");
            tokio::select! {
                () = notified => {}
                changed = abort.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    /// Move the action out of `Pending`, setting `executed` under the same
    /// lock. `None` if it already ran or was aborted.
    fn claim(&self, job: &Job) -> Option<Dispatch> {
        let mut state = self.state();
        if state.generation != job.generation {
            return None;
        }
        let record = state.record_mut(&job.action_id).ok()?;
        if record.executed || record.status != ActionStatus::Pending {
            return None;
        }
        let action = record.action.clone()?;
        record.executed = true;

        let dispatch = match action {
            Err(invalid) => {
                record.set_status(ActionStatus::Failed {
                    error: invalid.message.clone(),
                });
                record.result = Some(invalid.message.clone());
                Dispatch::Settle {
                    tool: invalid.tool_name.as_deref().and_then(|n| n.parse().ok()),
                    result: invalid.message,
                    resolve: invalid.call_id.is_some(),
                }
            }
            Ok(Action::Tool(ToolAction {
                invocation,
                prior_result: Some(prior),
                ..
            })) => Dispatch::Settle {
                tool: Some(invocation.name()),
                result: prior,
                resolve: false,
            },
            Ok(action) => {
                record.set_status(ActionStatus::Running);
                Dispatch::Run(action)
            }
        };
        let status = record.status.clone();
        drop(state);
        if status != ActionStatus::Pending {
            self.emit(WorkbenchEvent::ActionStatusChanged {
                action_id: job.action_id.clone(),
                status,
            });
        }
        Some(dispatch)
    }

    async fn write_file(&self, file: &FileAction) -> String {
        let path = normalize_path(&file.path);
        if let Err(e) = self.ctx.host.write_file(&path, &file.content).await {
            return error_result(e);
        }
        self.tracker.apply_batch([FileChange::Write {
            path: path.clone(),
            content: file.content.clone(),
        }]);
        self.emit(WorkbenchEvent::FileWritten { path: path.clone() });
        if self.options.install_on_package_json && path == PACKAGE_JSON {
            self.install_dependencies().await;
        }
        format!("Wrote {path}")
    }

    async fn install_dependencies(&self) {
        let args = vec!["install".to_string()];
        let success = match self.ctx.host.spawn_process("npm", &args).await {
            Ok(handle) => match handle.wait().await {
                Ok(output) if output.success() => true,
                Ok(output) => {
                    tracing::warn!(exit_code = output.exit_code, "npm install failed");
                    false
                }
                Err(e) => {
                    tracing::warn!("npm install did not finish: {e}");
                    false
                }
            },
            Err(e) => {
                tracing::warn!("Failed to start npm install: {e}");
                false
            }
        };
        self.emit(WorkbenchEvent::InstallFinished { success });
    }

    async fn run_tool(&self, tool: &ToolAction) -> String {
        let mut ctx = self.ctx.clone();
        ctx.tool_call_id.clone_from(&tool.call_id);
        let result = self.registry.execute(&tool.invocation, &ctx).await;

        if !is_error_result(&result)
            && let Some(path) = tool.invocation.written_path()
        {
            let path = normalize_path(path);
            let content = self
                .tracker
                .files()
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .file_content(&path)
                .map(str::to_string);
            if let Some(content) = content {
                self.state().buffers.insert(path.clone(), content.clone());
                self.tracker.apply_batch([FileChange::Write {
                    path: path.clone(),
                    content,
                }]);
                self.emit(WorkbenchEvent::FileWritten { path });
            }
        }
        result
    }

    /// Record the result. An action aborted while it ran stays aborted, and
    /// its tool call has already been failed by the abort.
    fn finish(
        &self,
        action_id: &ActionId,
        call_id: Option<&str>,
        tool: Option<ToolName>,
        result: String,
    ) {
        let status = if is_error_result(&result) {
            ActionStatus::Failed {
                error: result.clone(),
            }
        } else {
            ActionStatus::Complete
        };

        let mut state = self.state();
        let record = match state.record_mut(action_id) {
            Ok(record) => record,
            Err(e) => {
                tracing::error!("Workbench consistency error: {e}");
                return;
            }
        };
        if record.status == ActionStatus::Aborted {
            tracing::debug!(%action_id, "Action finished after abort; result discarded");
            return;
        }
        record.result = Some(result.clone());
        if record.status == ActionStatus::Running || record.status == ActionStatus::Pending {
            record.set_status(status.clone());
        }
        let status = record.status.clone();

        if let Some(id) = call_id {
            let outcome = self.policy().record(tool, result);
            if outcome.should_disable_tools {
                tracing::warn!(
                    failures = self.policy().consecutive_failures(),
                    "Consecutive tool failures reached threshold"
                );
            }
            if let Err(e) = self.calls().resolve(id, outcome) {
                tracing::warn!(call_id = %id, "{e}");
            }
        }
        drop(state);

        tracing::debug!(%action_id, status = status.label(), "Action finished");
        self.emit(WorkbenchEvent::ActionStatusChanged {
            action_id: action_id.clone(),
            status,
        });
    }
}
