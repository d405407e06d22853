//! The sync worker against a mock persistence service.

use std::sync::Arc;
use std::time::Duration;

use shipwright_engine::{FileChange, PartPosition};
use shipwright_sync::{
    BackoffConfig, HttpBackend, PersistenceBackend, RoundOutcome, SyncConfig, SyncEvent,
    SyncTarget, SyncWorker,
};
use shipwright_types::{ChatId, SessionId};
use tokio::time::timeout;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{loaded_conversation, tracker, user};

fn fast_config() -> SyncConfig {
    SyncConfig {
        min_sync_interval: Duration::from_millis(10),
        warning_failure_threshold: 3,
        backoff: BackoffConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            jitter_factor: 0.0,
        },
    }
}

#[tokio::test]
async fn failed_upload_is_retried_until_accepted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sync"))
        .respond_with(ResponseTemplate::new(500).set_body_string("down"))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sync"))
        .and(body_string_contains("name=\"snapshot\"; filename=\"snapshot.json.gz\""))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let tracker = tracker();
    tracker.apply_batch([FileChange::Write {
        path: "/index.html".into(),
        content: "<h1>hi</h1>".into(),
    }]);
    let worker = SyncWorker::new(
        Arc::new(HttpBackend::new(server.uri())) as Arc<dyn PersistenceBackend>,
        loaded_conversation(vec![user("u", "make a page")]),
        tracker,
        SyncTarget::new(ChatId::new("chat-1"), SessionId::new("session-1")),
        fast_config(),
    );
    let mut events = worker.subscribe();

    assert_eq!(worker.sync_round().await, RoundOutcome::Synced);

    let mut failures = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SyncEvent::Failed { failures: n, .. } = event {
            failures.push(n);
        }
    }
    assert_eq!(failures, vec![1, 2]);

    let state = worker.state();
    assert_eq!(state.failures, 0);
    assert_eq!(state.persisted, Some(PartPosition::new(0, 0)));
    assert_eq!(state.saved_file_counter, 1);
}

#[tokio::test]
async fn background_worker_syncs_new_messages() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sync"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let conversation = loaded_conversation(vec![user("u", "hello")]);
    let worker = Arc::new(SyncWorker::new(
        Arc::new(HttpBackend::new(server.uri())) as Arc<dyn PersistenceBackend>,
        Arc::clone(&conversation),
        tracker(),
        SyncTarget::new(ChatId::new("chat-1"), SessionId::new("session-1")),
        fast_config(),
    ));
    let mut events = worker.subscribe();
    let task = Arc::clone(&worker).spawn();

    let mut synced = Vec::new();
    while synced.len() < 2 {
        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("sync timed out")
            .unwrap();
        if let SyncEvent::Synced { position, .. } = event {
            synced.push(position);
            if synced.len() == 1 {
                conversation.push_message(user("v", "again"));
            }
        }
    }
    assert_eq!(
        synced,
        vec![
            Some(PartPosition::new(0, 0)),
            Some(PartPosition::new(1, 0))
        ]
    );
    task.abort();
}
