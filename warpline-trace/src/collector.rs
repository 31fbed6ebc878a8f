//! TraceCollector - stream middleware that rebuilds the span tree.
//!
//! Wraps the Wire's event stream without touching execution logic: events
//! pass through unchanged apart from trace/span id injection, while a Trace
//! is assembled on the side and checkpointed incrementally.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value;
use tracing::{error, warn};
use uuid::Uuid;

use warpline_core::{Role, RunnableType, Step, StepEvent, StepEventType};

use crate::model::{preview, Span, SpanKind, SpanStatus, Trace};
use crate::otlp::OtlpExporter;
use crate::store::TraceStore;

/// A tool call remembered from its assistant Step so the later tool Step's
/// span can carry the input arguments. Entries are consumed on use, which
/// doubles as eviction: once every tool result for an assistant has been
/// observed, nothing of that assistant remains in the cache.
struct CachedCall {
    tool_name: String,
    arguments: String,
}

#[derive(Default)]
struct CollectorState {
    run_spans: HashMap<String, String>,
    stage_spans: HashMap<(String, String), String>,
    stack: Vec<String>,
    pending_calls: HashMap<String, CachedCall>,
}

#[derive(Clone, Default)]
pub struct TraceCollector {
    store: Option<Arc<dyn TraceStore>>,
    exporter: Option<Arc<OtlpExporter>>,
}

impl TraceCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(mut self, store: Arc<dyn TraceStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_exporter(mut self, exporter: Arc<OtlpExporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Pass events through while building the Trace. The trace is saved at
    /// every checkpoint event and finalised when the stream ends; export
    /// happens asynchronously and never fails the stream.
    pub fn wrap_stream(
        &self,
        events: BoxStream<'static, StepEvent>,
        trace_id: Option<String>,
    ) -> BoxStream<'static, StepEvent> {
        let store = self.store.clone();
        let exporter = self.exporter.clone();

        async_stream::stream! {
            let mut events = events;
            let mut trace: Option<Trace> = trace_id.map(Trace::new);
            let mut state = CollectorState::default();
            let mut failed = false;

            while let Some(mut event) = events.next().await {
                let trace = trace.get_or_insert_with(|| {
                    Trace::new(
                        event
                            .trace_id
                            .clone()
                            .unwrap_or_else(|| Uuid::new_v4().to_string()),
                    )
                });

                let checkpoint = process_event(&event, trace, &mut state);
                if event.event_type == StepEventType::RunFailed {
                    failed = true;
                }

                event.trace_id = Some(trace.trace_id.clone());
                if let Some(span_id) = state.run_spans.get(&event.run_id) {
                    if event.span_id.is_none() {
                        event.span_id = Some(span_id.clone());
                    }
                    if event.parent_span_id.is_none() {
                        event.parent_span_id = trace
                            .span(span_id)
                            .and_then(|span| span.parent_span_id.clone());
                    }
                }

                if checkpoint {
                    if let Some(store) = &store {
                        if let Err(err) = store.save_trace(trace).await {
                            warn!(trace_id = %trace.trace_id, %err, "incremental trace save failed");
                        }
                    }
                }

                yield event;
            }

            let Some(mut trace) = trace else { return };
            trace.complete(if failed { SpanStatus::Error } else { SpanStatus::Ok });

            if let Some(store) = &store {
                if let Err(err) = store.save_trace(&trace).await {
                    error!(trace_id = %trace.trace_id, %err, "final trace save failed");
                }
            }
            if let Some(exporter) = exporter {
                let exported = trace.clone();
                tokio::spawn(async move {
                    exporter.export(&exported).await;
                });
            }
        }
        .boxed()
    }
}

/// Returns true when the event is a checkpoint worth persisting at.
fn process_event(event: &StepEvent, trace: &mut Trace, state: &mut CollectorState) -> bool {
    match event.event_type {
        StepEventType::RunStarted => {
            on_run_started(event, trace, state);
            true
        }
        StepEventType::StepCompleted => {
            if let Some(step) = &event.snapshot {
                on_step_completed(event, step, trace, state);
            }
            true
        }
        StepEventType::RunCompleted => {
            on_run_finished(event, trace, state, SpanStatus::Ok);
            true
        }
        StepEventType::RunFailed => {
            on_run_finished(event, trace, state, SpanStatus::Error);
            true
        }
        StepEventType::StageStarted | StepEventType::StageCompleted | StepEventType::StageSkipped => {
            on_stage_event(event, trace, state);
            false
        }
        _ => false,
    }
}

fn on_stage_event(event: &StepEvent, trace: &mut Trace, state: &mut CollectorState) {
    let Some(node_id) = event.node_id.clone() else {
        return;
    };
    let key = (event.run_id.clone(), node_id.clone());
    match event.event_type {
        StepEventType::StageStarted => {
            let parent_span_id = state
                .run_spans
                .get(&event.run_id)
                .or(state.stack.last())
                .cloned();
            let parent_depth = parent_span_id
                .as_deref()
                .and_then(|id| trace.span(id))
                .map(|span| span.depth)
                .unwrap_or(0);
            let mut span = Span::new(&trace.trace_id, SpanKind::Stage, node_id);
            span.parent_span_id = parent_span_id;
            span.depth = parent_depth + 1;
            span.run_id = Some(event.run_id.clone());
            if let Some(iteration) = event.iteration {
                span.attributes
                    .insert("iteration".to_string(), Value::from(iteration));
            }
            let span_id = trace.add_span(span);
            state.stage_spans.insert(key, span_id);
        }
        StepEventType::StageCompleted => {
            if let Some(span_id) = state.stage_spans.remove(&key) {
                if let Some(span) = trace.span_mut(&span_id) {
                    span.complete(SpanStatus::Ok);
                }
            }
        }
        StepEventType::StageSkipped => {
            // A skipped node gets a zero-length span so the tree still
            // shows the decision.
            let parent_span_id = state
                .run_spans
                .get(&event.run_id)
                .or(state.stack.last())
                .cloned();
            let parent_depth = parent_span_id
                .as_deref()
                .and_then(|id| trace.span(id))
                .map(|span| span.depth)
                .unwrap_or(0);
            let mut span = Span::new(&trace.trace_id, SpanKind::Stage, node_id);
            span.parent_span_id = parent_span_id;
            span.depth = parent_depth + 1;
            span.run_id = Some(event.run_id.clone());
            span.attributes
                .insert("skipped".to_string(), Value::Bool(true));
            span.complete(SpanStatus::Ok);
            trace.add_span(span);
        }
        _ => {}
    }
}

fn on_run_started(event: &StepEvent, trace: &mut Trace, state: &mut CollectorState) {
    let parent_span_id = event
        .parent_run_id
        .as_ref()
        .and_then(|parent_run| state.run_spans.get(parent_run))
        .or(state.stack.last())
        .cloned();

    let kind = match event.runnable_type {
        Some(RunnableType::Workflow) => SpanKind::Workflow,
        _ => SpanKind::Agent,
    };
    let name = event
        .runnable_id
        .clone()
        .unwrap_or_else(|| "run".to_string());

    let mut span = Span::new(&trace.trace_id, kind, name);
    span.parent_span_id = parent_span_id;
    span.depth = event.depth;
    span.run_id = Some(event.run_id.clone());
    span.attributes.insert(
        "nested".to_string(),
        Value::Bool(event.nesting_type.is_some()),
    );
    if let Some(data) = &event.data {
        if let Some(session_id) = data["session_id"].as_str() {
            span.attributes
                .insert("session_id".to_string(), Value::String(session_id.to_string()));
        }
    }

    if event.depth == 0 && trace.runnable_id.is_none() {
        trace.runnable_id = event.runnable_id.clone();
        trace.input_query = event
            .data
            .as_ref()
            .and_then(|data| data["input"].as_str().map(str::to_string));
        trace.session_id = event
            .data
            .as_ref()
            .and_then(|data| data["session_id"].as_str().map(str::to_string));
    }

    let span_id = trace.add_span(span);
    state.run_spans.insert(event.run_id.clone(), span_id.clone());
    state.stack.push(span_id);
}

fn on_step_completed(
    event: &StepEvent,
    step: &Step,
    trace: &mut Trace,
    state: &mut CollectorState,
) {
    let parent_span_id = state
        .run_spans
        .get(&event.run_id)
        .or(state.stack.last())
        .cloned();
    let parent_depth = parent_span_id
        .as_deref()
        .and_then(|id| trace.span(id))
        .map(|span| span.depth)
        .unwrap_or(0);

    match step.role {
        Role::Assistant => {
            let name = step
                .metrics
                .as_ref()
                .and_then(|metrics| metrics.model_name.clone())
                .unwrap_or_else(|| "llm_call".to_string());
            let mut span = Span::new(&trace.trace_id, SpanKind::LlmCall, name);
            span.parent_span_id = parent_span_id;
            span.depth = parent_depth + 1;
            span.started_at = step.created_at;
            span.run_id = Some(step.run_id.clone());
            if let Some(metrics) = &step.metrics {
                if let Some(duration) = metrics.duration_ms {
                    span.finished_at = Some(
                        step.created_at + chrono::Duration::milliseconds(duration as i64),
                    );
                }
                for (key, value) in [
                    ("model", metrics.model_name.clone()),
                    ("provider", metrics.provider.clone()),
                ] {
                    if let Some(value) = value {
                        span.attributes.insert(key.to_string(), Value::String(value));
                    }
                }
                trace.total_tokens += metrics.total_tokens.unwrap_or(0);
                trace.input_tokens += metrics.input_tokens.unwrap_or(0);
                trace.output_tokens += metrics.output_tokens.unwrap_or(0);
                span.attributes.insert(
                    "total_tokens".to_string(),
                    Value::from(metrics.total_tokens.unwrap_or(0)),
                );
            }
            if let Some(content) = &step.content {
                span.output_preview = Some(preview(content));
            }
            span.complete(SpanStatus::Ok);
            trace.llm_call_count += 1;
            trace.add_span(span);

            for call in step.tool_calls.iter().flatten() {
                state.pending_calls.insert(
                    call.id.clone(),
                    CachedCall {
                        tool_name: call.function.name.clone(),
                        arguments: call.function.arguments.clone(),
                    },
                );
            }
        }
        Role::Tool => {
            let name = step.name.clone().unwrap_or_else(|| "tool_call".to_string());
            let mut span = Span::new(&trace.trace_id, SpanKind::ToolCall, name);
            span.parent_span_id = parent_span_id;
            span.depth = parent_depth + 1;
            span.run_id = Some(step.run_id.clone());
            if let Some(metrics) = &step.metrics {
                if let Some(started) = metrics.tool_exec_started_at {
                    span.started_at = started;
                }
                span.finished_at = metrics.tool_exec_finished_at;
            }
            if let Some(call_id) = &step.tool_call_id {
                span.attributes
                    .insert("tool_call_id".to_string(), Value::String(call_id.clone()));
                if let Some(cached) = state.pending_calls.remove(call_id) {
                    span.attributes.insert(
                        "input_args".to_string(),
                        Value::String(preview(&cached.arguments)),
                    );
                    span.attributes
                        .insert("tool".to_string(), Value::String(cached.tool_name));
                }
            }
            let is_error = step
                .content
                .as_deref()
                .is_some_and(|content| content.starts_with("Error:"));
            if let Some(content) = &step.content {
                span.output_preview = Some(preview(content));
            }
            span.complete(if is_error {
                SpanStatus::Error
            } else {
                SpanStatus::Ok
            });
            trace.tool_call_count += 1;
            trace.add_span(span);
        }
        _ => {}
    }
}

fn on_run_finished(
    event: &StepEvent,
    trace: &mut Trace,
    state: &mut CollectorState,
    status: SpanStatus,
) {
    let Some(span_id) = state.run_spans.get(&event.run_id).cloned() else {
        return;
    };
    if let Some(span) = trace.span_mut(&span_id) {
        span.complete(status);
        if let Some(data) = &event.data {
            let field = if status == SpanStatus::Error {
                "error"
            } else {
                "response"
            };
            if let Some(text) = data[field].as_str() {
                if status == SpanStatus::Error {
                    span.error_message = Some(text.to_string());
                } else {
                    span.output_preview = Some(preview(text));
                }
            }
        }
    }
    state.stack.retain(|id| id != &span_id);
}
