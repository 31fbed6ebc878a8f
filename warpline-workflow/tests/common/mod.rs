//! Fixtures for workflow tests: scripted agents and a Wire-collecting
//! harness.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::stream::BoxStream;
use futures::StreamExt;

use warpline_agent::{Agent, RunnableExecutor};
use warpline_core::{
    ChatMessage, ExecutionContext, RunOutput, Runnable, SessionStore, StepEvent, ToolSpec,
    WarplineError, Wire,
};
use warpline_llm::{ModelChunk, ModelClient, TokenUsage};

/// Model that replays scripted replies, one per call; repeats the last
/// reply when the script is exhausted.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    last: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new<S: Into<String>>(replies: Vec<S>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ModelClient for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted-1"
    }

    fn provider(&self) -> &str {
        "scripted"
    }

    fn stream(
        &self,
        _messages: Vec<ChatMessage>,
        _tools: Option<Vec<ToolSpec>>,
    ) -> BoxStream<'_, Result<ModelChunk, WarplineError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = {
            let mut replies = self.replies.lock().unwrap();
            match replies.pop_front() {
                Some(reply) => {
                    *self.last.lock().unwrap() = Some(reply.clone());
                    reply
                }
                None => self.last.lock().unwrap().clone().unwrap_or_default(),
            }
        };
        let chunks = vec![
            Ok(ModelChunk::content(reply)),
            Ok(ModelChunk::usage(TokenUsage {
                input_tokens: 5,
                output_tokens: 3,
                total_tokens: 8,
                cached_tokens: None,
                cache_creation_tokens: None,
            })),
        ];
        futures::stream::iter(chunks).boxed()
    }
}

/// An agent whose model replays the given replies in order.
pub fn scripted_agent<S: Into<String>>(
    id: &str,
    replies: Vec<S>,
    store: Arc<dyn SessionStore>,
) -> Arc<Agent> {
    Arc::new(
        Agent::builder(id)
            .model(ScriptedModel::new(replies))
            .store(store)
            .build()
            .unwrap(),
    )
}

/// Run a workflow (or any Runnable) collecting all Wire events.
pub async fn run_collect(
    runnable: Arc<dyn Runnable>,
    input: &str,
    session_id: &str,
    store: Arc<dyn SessionStore>,
) -> (Result<RunOutput, WarplineError>, Vec<StepEvent>) {
    let ctx = ExecutionContext::root(session_id, Wire::new())
        .with_runnable(runnable.id(), runnable.runnable_type());
    let reader = ctx.wire.read();
    let input = input.to_string();
    let task = tokio::spawn(async move {
        let executor = RunnableExecutor::new(Some(store));
        let result = executor.execute(runnable.as_ref(), &input, &ctx).await;
        ctx.wire.close().await;
        result
    });
    let events: Vec<StepEvent> = reader.collect().await;
    let result = task.await.expect("executor task");
    (result, events)
}
