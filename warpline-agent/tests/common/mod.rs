//! Shared fixtures: a scripted model, simple tools, and a harness that runs
//! a Runnable while collecting everything written to the Wire.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::{json, Value};

use warpline_agent::RunnableExecutor;
use warpline_core::{
    AbortSignal, ExecutionContext, FunctionFragment, RunOutput, Runnable, SessionStore, StepEvent,
    Tool, ToolCallFragment, ToolError, WarplineError, Wire,
};
use warpline_llm::{ModelChunk, ModelClient, TokenUsage};

/// Model that replays scripted turns; each `stream` call pops one turn.
/// The last turn is repeated once the script runs out, which makes
/// "always calls a tool" scenarios trivial to express.
pub struct ScriptedModel {
    turns: Mutex<VecDeque<Vec<ModelChunk>>>,
    repeat_last: Option<Vec<ModelChunk>>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(turns: Vec<Vec<ModelChunk>>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into()),
            repeat_last: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn repeating(turn: Vec<ModelChunk>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(VecDeque::new()),
            repeat_last: Some(turn),
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
        _messages: Vec<warpline_core::ChatMessage>,
        _tools: Option<Vec<warpline_core::ToolSpec>>,
    ) -> BoxStream<'_, Result<ModelChunk, WarplineError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let turn = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.repeat_last.clone())
            .unwrap_or_default();
        futures::stream::iter(turn.into_iter().map(Ok)).boxed()
    }
}

pub fn usage_chunk(input: u64, output: u64) -> ModelChunk {
    ModelChunk::usage(TokenUsage {
        input_tokens: input,
        output_tokens: output,
        total_tokens: input + output,
        cached_tokens: None,
        cache_creation_tokens: None,
    })
}

/// A plain-text assistant turn streamed in two content chunks.
pub fn text_turn(text: &str) -> Vec<ModelChunk> {
    let midpoint = text.len() / 2;
    let mut cut = midpoint;
    while !text.is_char_boundary(cut) {
        cut += 1;
    }
    vec![
        ModelChunk::content(&text[..cut]),
        ModelChunk::content(&text[cut..]),
        usage_chunk(10, 5),
    ]
}

/// A turn that calls one tool, arguments split across two fragments.
pub fn tool_turn(call_id: &str, tool: &str, arguments: &str) -> Vec<ModelChunk> {
    let midpoint = arguments.len() / 2;
    vec![
        ModelChunk::tool_calls(vec![ToolCallFragment {
            index: 0,
            id: Some(call_id.to_string()),
            kind: Some("function".to_string()),
            function: FunctionFragment {
                name: Some(tool.to_string()),
                arguments: Some(arguments[..midpoint].to_string()),
            },
        }]),
        ModelChunk::tool_calls(vec![ToolCallFragment {
            index: 0,
            id: None,
            kind: None,
            function: FunctionFragment {
                name: None,
                arguments: Some(arguments[midpoint..].to_string()),
            },
        }]),
        usage_chunk(12, 8),
    ]
}

pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the given text back."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    }

    async fn execute(
        &self,
        args: Value,
        _ctx: &ExecutionContext,
        _abort: &AbortSignal,
    ) -> Result<Value, ToolError> {
        let text = args["text"].as_str().unwrap_or_default();
        Ok(Value::String(format!("Echo: {text}")))
    }
}

/// Cacheable tool that counts real executions.
pub struct CountingTool {
    pub executions: AtomicUsize,
}

impl CountingTool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            executions: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Tool for CountingTool {
    fn name(&self) -> &str {
        "lookup"
    }

    fn description(&self) -> &str {
        "Expensive lookup worth caching."
    }

    fn schema(&self) -> Value {
        json!({"type": "object", "properties": {"key": {"type": "string"}}})
    }

    fn cacheable(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        args: Value,
        _ctx: &ExecutionContext,
        _abort: &AbortSignal,
    ) -> Result<Value, ToolError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        Ok(Value::String(format!(
            "value-for-{}",
            args["key"].as_str().unwrap_or_default()
        )))
    }
}

/// Run a Runnable through the executor, closing the Wire afterwards, and
/// return the output with every event that crossed the Wire.
pub async fn run_collect(
    runnable: Arc<dyn Runnable>,
    input: &str,
    session_id: &str,
    store: Option<Arc<dyn SessionStore>>,
) -> (Result<RunOutput, WarplineError>, Vec<StepEvent>) {
    let ctx = ExecutionContext::root(session_id, Wire::new())
        .with_runnable(runnable.id(), runnable.runnable_type());
    run_collect_with_ctx(runnable, input, ctx, store).await
}

pub async fn run_collect_with_ctx(
    runnable: Arc<dyn Runnable>,
    input: &str,
    ctx: ExecutionContext,
    store: Option<Arc<dyn SessionStore>>,
) -> (Result<RunOutput, WarplineError>, Vec<StepEvent>) {
    let reader = ctx.wire.read();
    let input = input.to_string();
    let task = tokio::spawn(async move {
        let executor = RunnableExecutor::new(store);
        let result = executor.execute(runnable.as_ref(), &input, &ctx).await;
        ctx.wire.close().await;
        result
    });
    let events: Vec<StepEvent> = reader.collect().await;
    let result = task.await.expect("executor task");
    (result, events)
}
