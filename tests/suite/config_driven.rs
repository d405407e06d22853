//! Config file values flowing into the runtime.

use std::fs;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use shipwright_config::ShipwrightConfig;
use shipwright_engine::{FileChangeTracker, Workbench};
use shipwright_parser::StreamingParser;
use shipwright_sync::{
    MemoryBackend, PersistenceBackend, RoundOutcome, SyncEvent, SyncTarget, SyncWorker,
};
use shipwright_tools::{MemorySandboxHost, SandboxHost};
use shipwright_types::{ChatId, FileCache, MessageId, PartId, SessionId};

use crate::common::{loaded_conversation, user};

fn load(toml: &str) -> ShipwrightConfig {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, toml).unwrap();
    ShipwrightConfig::load_from(&path).unwrap()
}

#[tokio::test]
async fn execution_and_files_sections_shape_the_workbench() {
    let config = load(
        r#"
[execution]
install_on_package_json = false

[files]
ignored_prefixes = ["generated"]
"#,
    );

    let host = Arc::new(MemorySandboxHost::new());
    let tracker = Arc::new(FileChangeTracker::new(
        Arc::new(RwLock::new(FileCache::new())),
        config.ignored_prefixes(),
    ));
    let workbench = Workbench::new(
        Arc::clone(&host) as Arc<dyn SandboxHost>,
        Arc::clone(&tracker),
        config.workbench_options(),
    );

    let part_id = PartId::new(MessageId::new("m"), 0);
    let markup = concat!(
        r#"<artifact id="app" title="App">"#,
        r#"<action type="file" path="package.json">{"name":"app"}</action>"#,
        r#"<action type="file" path="generated/types.ts">export {}</action>"#,
        "</artifact>"
    );
    workbench.apply_all(StreamingParser::new().parse(&part_id, markup));
    workbench.wait_idle().await;

    assert_eq!(host.file("/package.json").as_deref(), Some(r#"{"name":"app"}"#));
    assert_eq!(host.file("/generated/types.ts").as_deref(), Some("export {}"));
    assert!(host.spawned().is_empty());
    assert_eq!(tracker.counter(), 1);
    assert!(
        tracker
            .files()
            .read()
            .unwrap()
            .file_content("/generated/types.ts")
            .is_none()
    );
}

#[tokio::test(start_paused = true)]
async fn sync_section_sets_backoff() {
    let config = load(
        r#"
[sync]
initial_backoff_ms = 40
max_backoff_ms = 40
jitter_factor = 0.0
"#,
    );

    let backend = Arc::new(MemoryBackend::new());
    backend.fail_next(2);
    let tracker = Arc::new(FileChangeTracker::new(
        Arc::new(RwLock::new(FileCache::new())),
        config.ignored_prefixes(),
    ));
    let worker = SyncWorker::new(
        Arc::clone(&backend) as Arc<dyn PersistenceBackend>,
        loaded_conversation(vec![user("u", "hello")]),
        tracker,
        SyncTarget::new(ChatId::new("chat"), SessionId::new("session")),
        config.sync_config(),
    );
    let mut events = worker.subscribe();

    assert_eq!(worker.sync_round().await, RoundOutcome::Synced);

    let mut delays = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SyncEvent::Failed { delay, .. } = event {
            delays.push(delay);
        }
    }
    assert_eq!(delays, vec![Duration::from_millis(40); 2]);
}
