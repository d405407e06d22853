//! A turn from prompt to persisted state: model stream, workbench, sync.

use std::sync::Arc;

use serde_json::json;
use shipwright_context::{ContextBuilder, ContextLimits};
use shipwright_engine::{
    Conversation, PartPosition, TurnLoop, TurnOptions, TurnOutcome, Workbench, WorkbenchOptions,
};
use shipwright_sync::{
    MemoryBackend, PersistenceBackend, RoundOutcome, SyncConfig, SyncTarget, SyncWorker,
    UnloadDecision, gunzip_json,
};
use shipwright_tools::{MemorySandboxHost, SandboxHost};
use shipwright_types::{
    ChatId, FileCache, FinishReason, Message, ModelToolCall, SessionId, ToolInvocationState,
};

use crate::common::{ScriptedModel, stop, text, tool_calls, tracker};

struct Harness {
    host: Arc<MemorySandboxHost>,
    workbench: Workbench,
    conversation: Arc<Conversation>,
    backend: Arc<MemoryBackend>,
    worker: SyncWorker,
    turn: TurnLoop<ScriptedModel>,
}

fn harness(model: ScriptedModel) -> Harness {
    let host = Arc::new(MemorySandboxHost::new());
    let tracker = tracker();
    let workbench = Workbench::new(
        Arc::clone(&host) as Arc<dyn SandboxHost>,
        Arc::clone(&tracker),
        WorkbenchOptions::default(),
    );
    let conversation = Arc::new(Conversation::new());
    conversation.load(Vec::new(), 0);

    let backend = Arc::new(MemoryBackend::new());
    let worker = SyncWorker::new(
        Arc::clone(&backend) as Arc<dyn PersistenceBackend>,
        Arc::clone(&conversation),
        tracker,
        SyncTarget::new(ChatId::new("chat"), SessionId::new("session")),
        SyncConfig::default(),
    );
    let turn = TurnLoop::new(
        model,
        Arc::clone(&conversation),
        workbench.clone(),
        ContextBuilder::new(ContextLimits::default()),
        TurnOptions::default(),
    );
    Harness {
        host,
        workbench,
        conversation,
        backend,
        worker,
        turn,
    }
}

#[tokio::test]
async fn streamed_artifact_is_built_and_persisted() {
    let model = ScriptedModel::new(vec![vec![
        text("Starting.\n<artifact id=\"todo\" title=\"Todo App\">"),
        text("<action type=\"file\" path=\"src/App.tsx\">export default "),
        text("function App() {}</action>"),
        text("<action type=\"shell\">npm run dev</action></artifact>"),
        stop(),
    ]]);
    let mut h = harness(model);

    let outcome = h.turn.run("build a todo app").await.unwrap();
    assert_eq!(
        outcome,
        TurnOutcome::Finished {
            reason: FinishReason::Stop,
            steps: 1
        }
    );
    h.workbench.wait_idle().await;
    assert_eq!(
        h.host.file("/src/App.tsx").as_deref(),
        Some("export default function App() {}")
    );
    assert_eq!(h.host.spawned(), vec!["sh -c npm run dev"]);

    let guard = h.worker.unload_guard();
    assert!(matches!(guard.check(), UnloadDecision::Confirm { .. }));

    assert_eq!(h.worker.sync_round().await, RoundOutcome::Synced);
    assert_eq!(guard.check(), UnloadDecision::Allow);
    assert_eq!(h.backend.allocations(), vec!["todo-app".to_string()]);

    let uploads = h.backend.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].position, Some(PartPosition::new(1, 0)));

    let messages: Vec<Message> = gunzip_json(uploads[0].messages.as_deref().unwrap()).unwrap();
    assert_eq!(messages.len(), 2);
    assert!(messages[1].text_content().contains("Todo App"));

    let snapshot: FileCache = gunzip_json(uploads[0].snapshot.as_deref().unwrap()).unwrap();
    assert_eq!(
        snapshot.file_content("/src/App.tsx"),
        Some("export default function App() {}")
    );
}

#[tokio::test]
async fn tool_results_are_persisted_with_the_turn() {
    let model = ScriptedModel::new(vec![
        vec![tool_calls(vec![ModelToolCall::new(
            "call-1",
            "shell",
            json!({"command": "npm test"}),
        )])],
        vec![text("All green."), stop()],
    ]);
    let mut h = harness(model.clone());

    h.turn.run("run the tests").await.unwrap();
    assert_eq!(h.host.spawned(), vec!["sh -c npm test"]);
    assert_eq!(model.requests().len(), 2);

    assert_eq!(h.worker.sync_round().await, RoundOutcome::Synced);
    let uploads = h.backend.uploads();
    assert_eq!(uploads[0].position, Some(PartPosition::new(1, 1)));
    assert!(uploads[0].snapshot.is_none());

    let messages: Vec<Message> = gunzip_json(uploads[0].messages.as_deref().unwrap()).unwrap();
    let invocation = messages[1].parts()[0].as_tool_invocation().unwrap();
    assert_eq!(invocation.state, ToolInvocationState::Result);
    assert!(h.backend.allocations().is_empty());
}

#[tokio::test]
async fn second_turn_syncs_only_past_the_watermark() {
    let model = ScriptedModel::new(vec![
        vec![text("One."), stop()],
        vec![text("Two."), stop()],
    ]);
    let mut h = harness(model);

    h.turn.run("first").await.unwrap();
    assert_eq!(h.worker.sync_round().await, RoundOutcome::Synced);
    assert_eq!(h.worker.sync_round().await, RoundOutcome::Skipped);

    h.turn.run("second").await.unwrap();
    assert_eq!(h.conversation.len(), 4);
    assert_eq!(h.worker.sync_round().await, RoundOutcome::Synced);

    let uploads = h.backend.uploads();
    assert_eq!(uploads.len(), 2);
    assert_eq!(uploads[1].position, Some(PartPosition::new(3, 0)));
    assert_eq!(h.worker.state().persisted, Some(PartPosition::new(3, 0)));
}
