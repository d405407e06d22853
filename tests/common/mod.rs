//! Shared test utilities and fixtures

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};
use std::time::SystemTime;

use shipwright_engine::{
    Conversation, DEFAULT_IGNORED_PREFIXES, FileChangeTracker, ModelClient, ModelError, ModelFut,
};
use shipwright_types::{
    FileCache, FinishReason, Message, MessageId, ModelEvent, ModelRequest, ModelStepEnd,
    ModelToolCall,
};
use tokio::sync::mpsc;

/// Model that plays back canned steps, one per request. Clones share the
/// script and the request log.
#[derive(Clone, Default)]
pub struct ScriptedModel {
    steps: Arc<Mutex<VecDeque<Vec<ModelEvent>>>>,
    requests: Arc<Mutex<Vec<ModelRequest>>>,
}

impl ScriptedModel {
    pub fn new(steps: Vec<Vec<ModelEvent>>) -> Self {
        Self {
            steps: Arc::new(Mutex::new(steps.into())),
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl ModelClient for ScriptedModel {
    fn stream<'a>(&'a self, request: ModelRequest, tx: mpsc::Sender<ModelEvent>) -> ModelFut<'a> {
        Box::pin(async move {
            self.requests.lock().unwrap().push(request);
            let Some(events) = self.steps.lock().unwrap().pop_front() else {
                return Err(ModelError::Request("script exhausted".into()));
            };
            for event in events {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            Ok(())
        })
    }
}

pub fn text(delta: &str) -> ModelEvent {
    ModelEvent::TextDelta(delta.to_string())
}

pub fn stop() -> ModelEvent {
    ModelEvent::Finished(ModelStepEnd {
        finish_reason: FinishReason::Stop,
        tool_calls: Vec::new(),
    })
}

pub fn tool_calls(calls: Vec<ModelToolCall>) -> ModelEvent {
    ModelEvent::Finished(ModelStepEnd {
        finish_reason: FinishReason::ToolCalls,
        tool_calls: calls,
    })
}

pub fn tracker() -> Arc<FileChangeTracker> {
    Arc::new(FileChangeTracker::new(
        Arc::new(RwLock::new(FileCache::new())),
        DEFAULT_IGNORED_PREFIXES,
    ))
}

/// A conversation with history loaded, ready to sync.
pub fn loaded_conversation(messages: Vec<Message>) -> Arc<Conversation> {
    let conversation = Arc::new(Conversation::new());
    conversation.load(messages, 0);
    conversation
}

pub fn user(id: &str, text: &str) -> Message {
    Message::user(MessageId::new(id), text, SystemTime::UNIX_EPOCH)
}
