//! Model-stepping loop.
//!
//! One turn: the user message lands, then the loop repeatedly builds a bounded
//! context, streams the model's reply into the trailing assistant message,
//! feeds parser events to the workbench, and answers tool calls by waiting on
//! their promises. It stops on `stop`/`length`, at the step cap, or when the
//! user stops it.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use futures_util::future::{AbortHandle, Abortable};
use shipwright_context::{ContextBuildError, ContextBuilder};
use shipwright_parser::{StreamingParser, render_tool_invocation};
use shipwright_types::{
    FinishReason, Message, MessageId, ModelEvent, ModelRequest, ModelStepEnd, ModelToolCall, Part,
    PartId, ToolInvocationPart,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use uuid::Uuid;

use crate::conversation::Conversation;
use crate::scheduler::CoalescingScheduler;
use crate::tool_calls::ToolCallError;
use crate::workbench::Workbench;

const STREAM_CAPACITY: usize = 64;

/// Model step future type alias.
pub type ModelFut<'a> = Pin<Box<dyn Future<Output = Result<(), ModelError>> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model request failed: {0}")]
    Request(String),
    #[error("model stream ended without a finish event")]
    Truncated,
}

/// The model invocation boundary.
pub trait ModelClient: Send + Sync {
    /// Stream one step of the reply into `tx`, ending with
    /// [`ModelEvent::Finished`].
    fn stream<'a>(&'a self, request: ModelRequest, tx: mpsc::Sender<ModelEvent>) -> ModelFut<'a>;
}

#[derive(Debug, Error)]
pub enum TurnError {
    #[error(transparent)]
    Context(#[from] ContextBuildError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    ToolCall(#[from] ToolCallError),
    #[error("conversation has no message to stream into")]
    NoAssistantMessage,
}

#[derive(Debug, Clone)]
pub struct TurnOptions {
    pub system_prompt: String,
    pub max_steps: usize,
    /// Sampling window for re-parsing streamed text.
    pub stream_sample: Duration,
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            max_steps: 16,
            stream_sample: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Finished { reason: FinishReason, steps: usize },
    StepLimit { steps: usize },
    Stopped,
}

/// Stops the running turn and aborts every outstanding action.
#[derive(Clone)]
pub struct StopHandle {
    current: Arc<Mutex<Option<AbortHandle>>>,
    workbench: Workbench,
}

impl StopHandle {
    pub fn stop(&self) {
        if let Some(handle) = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        self.workbench.abort_all();
    }
}

fn new_message_id() -> MessageId {
    MessageId::new(Uuid::new_v4().to_string())
}

pub struct TurnLoop<M> {
    client: M,
    conversation: Arc<Conversation>,
    workbench: Workbench,
    builder: ContextBuilder,
    parser: StreamingParser,
    sampler: CoalescingScheduler<PartId, ()>,
    options: TurnOptions,
    tools_disabled: bool,
    skip_system_prompt: bool,
    current: Arc<Mutex<Option<AbortHandle>>>,
}

impl<M: ModelClient> TurnLoop<M> {
    pub fn new(
        client: M,
        conversation: Arc<Conversation>,
        workbench: Workbench,
        builder: ContextBuilder,
        options: TurnOptions,
    ) -> Self {
        let sampler = CoalescingScheduler::new(options.stream_sample);
        Self {
            client,
            conversation,
            workbench,
            builder,
            parser: StreamingParser::new(),
            sampler,
            options,
            tools_disabled: false,
            skip_system_prompt: false,
            current: Arc::new(Mutex::new(None)),
        }
    }

    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            current: Arc::clone(&self.current),
            workbench: self.workbench.clone(),
        }
    }

    #[must_use]
    pub fn tools_disabled(&self) -> bool {
        self.tools_disabled
    }

    #[must_use]
    pub fn conversation(&self) -> &Arc<Conversation> {
        &self.conversation
    }

    /// Run one user turn to completion.
    pub async fn run(&mut self, user_text: &str) -> Result<TurnOutcome, TurnError> {
        let (handle, registration) = AbortHandle::new_pair();
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        let result = Abortable::new(self.run_steps(user_text), registration).await;
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match result {
            Ok(outcome) => outcome,
            Err(_aborted) => {
                tracing::info!("Turn stopped by user");
                self.sampler.clear();
                self.conversation.finish_last();
                Ok(TurnOutcome::Stopped)
            }
        }
    }

    async fn run_steps(&mut self, user_text: &str) -> Result<TurnOutcome, TurnError> {
        self.conversation.push_message(Message::user(
            new_message_id(),
            user_text,
            SystemTime::now(),
        ));

        for step in 1..=self.options.max_steps {
            let request = self.build_request()?;
            if step == 1 {
                self.conversation
                    .push_message(Message::assistant(new_message_id(), SystemTime::now()));
            }
            tracing::debug!(
                step,
                messages = request.messages.len(),
                tools = request.tools.len(),
                system_prompt = request.system_prompt.is_some(),
                "Model step"
            );

            let end = self.stream_step(request).await?;
            match end.finish_reason {
                FinishReason::ToolCalls if !end.tool_calls.is_empty() => {
                    self.answer_tool_calls(end.tool_calls).await?;
                }
                reason => {
                    self.conversation.finish_last();
                    return Ok(TurnOutcome::Finished {
                        reason,
                        steps: step,
                    });
                }
            }
        }

        tracing::warn!(max_steps = self.options.max_steps, "Turn hit the step cap");
        self.conversation.finish_last();
        Ok(TurnOutcome::StepLimit {
            steps: self.options.max_steps,
        })
    }

    fn build_request(&mut self) -> Result<ModelRequest, TurnError> {
        let messages = self.conversation.messages();
        let prepared = {
            let files = self
                .workbench
                .tracker()
                .files()
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            self.builder.build(&messages, &files)?
        };
        let usage = prepared.usage();
        tracing::debug!(usage = %usage.format_compact(), "Context prepared");

        let system_prompt = if self.skip_system_prompt {
            None
        } else {
            Some(self.options.system_prompt.clone())
        };
        self.skip_system_prompt = false;
        let tools = if self.tools_disabled {
            Vec::new()
        } else {
            self.workbench.tool_definitions()
        };
        Ok(ModelRequest {
            system_prompt,
            messages: prepared.into_messages(),
            tools,
        })
    }

    async fn stream_step(&mut self, request: ModelRequest) -> Result<ModelStepEnd, TurnError> {
        let (tx, mut rx) = mpsc::channel(STREAM_CAPACITY);
        let Self {
            client,
            conversation,
            workbench,
            parser,
            sampler,
            ..
        } = self;

        let producer = client.stream(request, tx);
        let consumer = async {
            let mut end = None;
            loop {
                let deadline = sampler.next_deadline();
                let event = tokio::select! {
                    event = rx.recv() => event,
                    () = time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                        if deadline.is_some() =>
                    {
                        for (due, ()) in sampler.due() {
                            parse_part(conversation, parser, workbench, &due);
                        }
                        continue;
                    }
                };
                let Some(event) = event else {
                    break;
                };
                match event {
                    ModelEvent::TextDelta(delta) => {
                        let Some(part_id) = conversation.update_last(|m| {
                            let index = m.append_text(&delta);
                            m.part_id(index)
                        }) else {
                            continue;
                        };
                        if sampler.offer(part_id.clone(), ()).is_some() {
                            parse_part(conversation, parser, workbench, &part_id);
                        }
                        for (due, ()) in sampler.due() {
                            parse_part(conversation, parser, workbench, &due);
                        }
                    }
                    ModelEvent::Finished(step_end) => end = Some(step_end),
                }
            }
            end
        };
        let (produced, end) = tokio::join!(producer, consumer);

        // The sampler may be holding the tail of the stream.
        let text_parts: Vec<PartId> = conversation.with_messages(|messages| {
            messages
                .last()
                .map(|m| {
                    (0..m.parts().len())
                        .filter(|&i| m.part(i).and_then(Part::as_text).is_some())
                        .map(|i| m.part_id(i))
                        .collect()
                })
                .unwrap_or_default()
        });
        for part_id in &text_parts {
            parse_part(conversation, parser, workbench, part_id);
        }
        sampler.clear();

        produced?;
        end.ok_or_else(|| ModelError::Truncated.into())
    }

    async fn answer_tool_calls(&mut self, calls: Vec<ModelToolCall>) -> Result<(), TurnError> {
        let mut pending = Vec::with_capacity(calls.len());
        for call in calls {
            // Registered before the part exists, so the queue never sees an
            // action for an unknown call.
            let promise = self.workbench.register_tool_call(&call.id)?;
            let invocation = ToolInvocationPart::call(call.id, call.name, call.arguments);
            let markup_source = invocation.clone();
            let part_id = self
                .conversation
                .update_last(|m| {
                    let index = m.push_part(Part::tool_invocation(invocation));
                    m.part_id(index)
                })
                .ok_or(TurnError::NoAssistantMessage)?;
            let markup = render_tool_invocation(&part_id, &markup_source);
            self.workbench.apply_all(self.parser.parse(&part_id, &markup));
            pending.push((part_id, promise));
        }

        let mut skip_system_prompt = false;
        for (part_id, promise) in pending {
            let outcome = promise.wait().await?;
            tracing::debug!(
                %part_id,
                error = outcome.is_error(),
                "Tool call resolved"
            );
            if outcome.should_disable_tools && !self.tools_disabled {
                tracing::warn!("Disabling tools after repeated failures");
                self.tools_disabled = true;
            }
            skip_system_prompt |= outcome.skip_system_prompt;
            self.conversation.update_last(|m| {
                if let Some(Part::ToolInvocation { invocation }) = m.part_mut(part_id.part_index())
                {
                    invocation.complete(outcome.result);
                }
            });
        }
        self.skip_system_prompt = skip_system_prompt;
        Ok(())
    }
}

fn parse_part(
    conversation: &Conversation,
    parser: &mut StreamingParser,
    workbench: &Workbench,
    part_id: &PartId,
) {
    let text = conversation.with_messages(|messages| {
        messages
            .iter()
            .rev()
            .find(|m| m.id() == part_id.message_id())
            .and_then(|m| m.part(part_id.part_index()))
            .and_then(Part::as_text)
            .map(str::to_string)
    });
    if let Some(text) = text {
        workbench.apply_all(parser.parse(part_id, &text));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::future;
    use std::sync::RwLock;

    use serde_json::json;
    use shipwright_context::ContextLimits;
    use shipwright_tools::MemorySandboxHost;
    use shipwright_types::{FileCache, ToolInvocationState};
    use tokio::time::sleep;

    use crate::files::{DEFAULT_IGNORED_PREFIXES, FileChangeTracker};
    use crate::workbench::WorkbenchOptions;

    #[derive(Default)]
    struct ScriptedModel {
        steps: Mutex<VecDeque<Vec<ModelEvent>>>,
        requests: Mutex<Vec<ModelRequest>>,
        hang_when_empty: bool,
        stall_after_step: bool,
    }

    impl ScriptedModel {
        fn new(steps: Vec<Vec<ModelEvent>>) -> Self {
            Self {
                steps: Mutex::new(steps.into()),
                ..Self::default()
            }
        }

        fn requests(&self) -> Vec<ModelRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl ModelClient for ScriptedModel {
        fn stream<'a>(
            &'a self,
            request: ModelRequest,
            tx: mpsc::Sender<ModelEvent>,
        ) -> ModelFut<'a> {
            Box::pin(async move {
                self.requests.lock().unwrap().push(request);
                let step = self.steps.lock().unwrap().pop_front();
                let Some(events) = step else {
                    if self.hang_when_empty {
                        future::pending::<()>().await;
                    }
                    return Err(ModelError::Request("script exhausted".into()));
                };
                for event in events {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
                if self.stall_after_step {
                    future::pending::<()>().await;
                }
                Ok(())
            })
        }
    }

    fn text(delta: &str) -> ModelEvent {
        ModelEvent::TextDelta(delta.to_string())
    }

    fn finish(reason: FinishReason, tool_calls: Vec<ModelToolCall>) -> ModelEvent {
        ModelEvent::Finished(ModelStepEnd {
            finish_reason: reason,
            tool_calls,
        })
    }

    fn turn_loop(host: &Arc<MemorySandboxHost>, model: ScriptedModel) -> TurnLoop<ScriptedModel> {
        let tracker = Arc::new(FileChangeTracker::new(
            Arc::new(RwLock::new(FileCache::new())),
            DEFAULT_IGNORED_PREFIXES,
        ));
        let workbench = Workbench::new(host.clone(), tracker, WorkbenchOptions::default());
        TurnLoop::new(
            model,
            Arc::new(Conversation::new()),
            workbench,
            ContextBuilder::new(ContextLimits::default()),
            TurnOptions {
                system_prompt: "You build web apps.".into(),
                ..TurnOptions::default()
            },
        )
    }

    #[tokio::test]
    async fn streamed_file_action_is_written() {
        let host = Arc::new(MemorySandboxHost::new());
        let model = ScriptedModel::new(vec![vec![
            text("Here you go.\n<artifact id=\"a\" title=\"Counter\">"),
            text("<action type=\"file\" path=\"/src/count.ts\">export const n"),
            text(" = 1;</action></artifact>"),
            finish(FinishReason::Stop, Vec::new()),
        ]]);
        let mut turn = turn_loop(&host, model);

        let outcome = turn.run("make a counter").await.unwrap();
        assert_eq!(
            outcome,
            TurnOutcome::Finished {
                reason: FinishReason::Stop,
                steps: 1
            }
        );
        turn.workbench.wait_idle().await;
        assert_eq!(host.file("/src/count.ts").as_deref(), Some("export const n = 1;"));

        let messages = turn.conversation().messages();
        assert_eq!(messages.len(), 2);
        assert!(messages[1].text_content().starts_with("Here you go."));
        let requests = turn.client.requests();
        assert_eq!(requests[0].system_prompt.as_deref(), Some("You build web apps."));
        assert_eq!(requests[0].tools.len(), 5);
    }

    #[tokio::test]
    async fn tool_calls_round_trip_into_the_next_step() {
        let host = Arc::new(MemorySandboxHost::new().with_file("/a.ts", "let a = 1;"));
        let model = ScriptedModel::new(vec![
            vec![finish(
                FinishReason::ToolCalls,
                vec![ModelToolCall::new("call-1", "view", json!({"path": "/a.ts"}))],
            )],
            vec![text("Looks fine."), finish(FinishReason::Stop, Vec::new())],
        ]);
        let mut turn = turn_loop(&host, model);

        let outcome = turn.run("check a.ts").await.unwrap();
        assert_eq!(
            outcome,
            TurnOutcome::Finished {
                reason: FinishReason::Stop,
                steps: 2
            }
        );

        let messages = turn.conversation().messages();
        let invocation = messages[1].parts()[0].as_tool_invocation().unwrap();
        assert_eq!(invocation.state, ToolInvocationState::Result);
        assert!(invocation.result.as_deref().unwrap().contains("let a = 1;"));
        assert_eq!(messages[1].text_content(), "Looks fine.");

        let requests = turn.client.requests();
        assert_eq!(requests.len(), 2);
        let second = requests[1].messages.last().unwrap();
        assert!(second.parts()[0].as_tool_invocation().is_some());
    }

    #[tokio::test]
    async fn successful_deploy_skips_next_system_prompt() {
        let host = Arc::new(MemorySandboxHost::new());
        let model = ScriptedModel::new(vec![
            vec![finish(
                FinishReason::ToolCalls,
                vec![ModelToolCall::new("d", "deploy", json!({}))],
            )],
            vec![text("Deployed."), finish(FinishReason::Stop, Vec::new())],
        ]);
        let mut turn = turn_loop(&host, model);
        turn.run("ship it").await.unwrap();

        let requests = turn.client.requests();
        assert!(requests[0].system_prompt.is_some());
        assert!(requests[1].system_prompt.is_none());
        assert_eq!(host.spawned(), vec!["npm run deploy"]);
    }

    #[tokio::test]
    async fn repeated_failures_withdraw_tools() {
        let host = Arc::new(MemorySandboxHost::new());
        let mut steps: Vec<Vec<ModelEvent>> = (0..5)
            .map(|i| {
                vec![finish(
                    FinishReason::ToolCalls,
                    vec![ModelToolCall::new(
                        format!("c{i}"),
                        "view",
                        json!({"path": "/missing.ts"}),
                    )],
                )]
            })
            .collect();
        steps.push(vec![text("Giving up."), finish(FinishReason::Stop, Vec::new())]);
        let mut turn = turn_loop(&host, ScriptedModel::new(steps));

        turn.run("read it").await.unwrap();
        assert!(turn.tools_disabled());
        let requests = turn.client.requests();
        assert_eq!(requests.len(), 6);
        assert!(requests[..5].iter().all(|r| !r.tools.is_empty()));
        assert!(requests[5].tools.is_empty());
    }

    #[tokio::test]
    async fn step_cap_ends_the_turn() {
        let host = Arc::new(MemorySandboxHost::new());
        let steps = (0..3)
            .map(|i| {
                vec![finish(
                    FinishReason::ToolCalls,
                    vec![ModelToolCall::new(format!("s{i}"), "shell", json!({"command": "true"}))],
                )]
            })
            .collect();
        let mut turn = turn_loop(&host, ScriptedModel::new(steps));
        turn.options.max_steps = 2;
        assert_eq!(
            turn.run("loop").await.unwrap(),
            TurnOutcome::StepLimit { steps: 2 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stop_aborts_the_turn_and_pending_actions() {
        let host = Arc::new(MemorySandboxHost::new());
        let model = ScriptedModel {
            hang_when_empty: true,
            ..ScriptedModel::default()
        };
        let mut turn = turn_loop(&host, model);
        let stop = turn.stop_handle();

        let (outcome, ()) = tokio::join!(turn.run("wait forever"), async {
            sleep(Duration::from_millis(20)).await;
            stop.stop();
        });
        assert_eq!(outcome.unwrap(), TurnOutcome::Stopped);
        assert_eq!(turn.conversation().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn held_stream_update_lands_when_the_model_stalls() {
        let host = Arc::new(MemorySandboxHost::new());
        let model = ScriptedModel {
            stall_after_step: true,
            ..ScriptedModel::new(vec![vec![
                text("<artifact id=\"a\" title=\"T\"><action type=\"file\" path=\"/app.ts\">const a"),
                text(" = 1;"),
            ]])
        };
        let mut turn = turn_loop(&host, model);
        let wb = turn.workbench.clone();
        let stop = turn.stop_handle();

        let (outcome, ()) = tokio::join!(turn.run("go"), async {
            sleep(Duration::from_millis(50)).await;
            assert_eq!(wb.buffer("/app.ts").as_deref(), Some("const a"));
            sleep(Duration::from_millis(100)).await;
            assert_eq!(wb.buffer("/app.ts").as_deref(), Some("const a = 1;"));
            stop.stop();
        });
        assert_eq!(outcome.unwrap(), TurnOutcome::Stopped);
    }
}
