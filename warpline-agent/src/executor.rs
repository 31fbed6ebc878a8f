//! The LLM ↔ tool loop.
//!
//! Drives one agent turn cycle: stream an assistant Step from the model,
//! fan out any requested tool calls, feed results back, repeat until the
//! model stops calling tools or a limit interrupts the loop. Steps are
//! flushed to the store before their STEP_COMPLETED event is emitted, so an
//! emitted snapshot is always durable.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::StreamExt;
use tokio::time::Instant;
use tracing::{debug, info};

use warpline_core::{
    effective_timeout, AbortSignal, Conversation, EventFactory, ExecutionContext, Step, StepDelta,
    StepMetrics, TerminationReason, ToolCallData, ToolCallFragment, ToolSpec, WarplineError,
};
use warpline_llm::{ModelClient, TokenUsage};
use warpline_session::{SequenceManager, StepRepository};

use crate::config::AgentConfig;
use crate::tooling::ToolExecutor;

/// Merge streaming tool-call fragments by index. Chunks may arrive out of
/// order and id-less; entries that never receive an id are dropped at
/// finalisation.
#[derive(Default)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<usize, PartialCall>,
}

#[derive(Default)]
struct PartialCall {
    id: Option<String>,
    kind: Option<String>,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accumulate(&mut self, fragments: &[ToolCallFragment]) {
        for fragment in fragments {
            let entry = self.calls.entry(fragment.index).or_default();
            if let Some(id) = &fragment.id {
                entry.id = Some(id.clone());
            }
            if let Some(kind) = &fragment.kind {
                entry.kind = Some(kind.clone());
            }
            if let Some(name) = &fragment.function.name {
                entry.name.push_str(name);
            }
            if let Some(arguments) = &fragment.function.arguments {
                entry.arguments.push_str(arguments);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn finalize(&self) -> Vec<ToolCallData> {
        self.calls
            .values()
            .filter_map(|partial| {
                let id = partial.id.clone()?;
                Some(ToolCallData {
                    id,
                    kind: partial.kind.clone().unwrap_or_else(|| "function".to_string()),
                    function: warpline_core::FunctionCall {
                        name: partial.name.clone(),
                        arguments: partial.arguments.clone(),
                    },
                })
            })
            .collect()
    }
}

/// Bind context identity onto a Step before it is committed.
pub(crate) fn bind_step(step: &mut Step, ctx: &ExecutionContext) {
    step.runnable_id = ctx.runnable_id.clone();
    step.runnable_type = Some(ctx.runnable_type);
    step.workflow_id = ctx.workflow_id.clone();
    step.node_id = ctx.node_id.clone();
    step.branch_key = ctx.branch_key();
    step.iteration = ctx.iteration;
    step.parent_run_id = ctx.parent_run_id.clone();
    step.parent_span_id = ctx.parent_span_id.clone();
    step.depth = ctx.depth;
}

pub(crate) fn termination_for_abort(abort: &AbortSignal) -> TerminationReason {
    match abort.reason().as_deref() {
        Some("timeout") => TerminationReason::Timeout,
        _ => TerminationReason::Cancelled,
    }
}

/// What the loop left behind.
#[derive(Debug, Default)]
pub struct LoopOutcome {
    pub assistant_turns: usize,
    pub tool_call_count: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub last_sequence: u64,
    pub last_assistant_had_tools: bool,
    /// Tool calls requested but never executed (interrupted mid-batch or
    /// seeded by resume and then aborted).
    pub pending_tool_calls: Option<Vec<ToolCallData>>,
    /// `None` means the model terminated normally.
    pub termination: Option<TerminationReason>,
}

enum TurnOutcome {
    Completed(Box<Step>),
    Interrupted(TerminationReason),
}

pub struct AgentExecutor {
    model: Arc<dyn ModelClient>,
    tools: ToolExecutor,
    specs: Option<Vec<ToolSpec>>,
    config: AgentConfig,
    sequences: SequenceManager,
}

impl AgentExecutor {
    pub fn new(
        model: Arc<dyn ModelClient>,
        tools: ToolExecutor,
        specs: Option<Vec<ToolSpec>>,
        config: AgentConfig,
        sequences: SequenceManager,
    ) -> Self {
        Self {
            model,
            tools,
            specs,
            config,
            sequences,
        }
    }

    pub fn sequences(&self) -> &SequenceManager {
        &self.sequences
    }

    /// Run the loop until normal termination, the step cap, or an abort.
    pub async fn run_loop(
        &self,
        conversation: &mut Conversation,
        ctx: &ExecutionContext,
        repo: &mut StepRepository,
        ef: &EventFactory,
        pending_tool_calls: Option<Vec<ToolCallData>>,
    ) -> Result<LoopOutcome, WarplineError> {
        let mut outcome = LoopOutcome::default();
        let mut pending = pending_tool_calls;

        while outcome.assistant_turns < self.config.max_steps {
            if ctx.abort.is_aborted() {
                outcome.termination = Some(termination_for_abort(&ctx.abort));
                outcome.pending_tool_calls = pending;
                return Ok(outcome);
            }
            outcome.assistant_turns += 1;

            // Resume path: unfinished tool calls run before the next model turn.
            if let Some(calls) = pending.take() {
                match self
                    .run_tool_batch(&calls, conversation, ctx, repo, ef, &mut outcome)
                    .await?
                {
                    Some(reason) => {
                        outcome.termination = Some(reason);
                        outcome.pending_tool_calls = Some(calls);
                        return Ok(outcome);
                    }
                    None => continue,
                }
            }

            let step = match self
                .assistant_turn(conversation, ctx, repo, ef, &mut outcome)
                .await?
            {
                TurnOutcome::Completed(step) => step,
                TurnOutcome::Interrupted(reason) => {
                    outcome.termination = Some(reason);
                    return Ok(outcome);
                }
            };

            let calls = step.tool_calls.clone().unwrap_or_default();
            outcome.last_assistant_had_tools = !calls.is_empty();
            if calls.is_empty() {
                debug!(turns = outcome.assistant_turns, "loop terminated normally");
                return Ok(outcome);
            }

            outcome.tool_call_count += calls.len() as u64;
            if let Some(reason) = self
                .run_tool_batch(&calls, conversation, ctx, repo, ef, &mut outcome)
                .await?
            {
                outcome.termination = Some(reason);
                outcome.pending_tool_calls = Some(calls);
                return Ok(outcome);
            }
        }

        // Cap reached. Only counts as an abnormal ending when the model was
        // still mid-flight (its last turn requested tools).
        if outcome.last_assistant_had_tools {
            outcome.termination = Some(TerminationReason::MaxSteps);
            info!(max_steps = self.config.max_steps, "loop hit step cap");
        }
        Ok(outcome)
    }

    async fn assistant_turn(
        &self,
        conversation: &mut Conversation,
        ctx: &ExecutionContext,
        repo: &mut StepRepository,
        ef: &EventFactory,
        outcome: &mut LoopOutcome,
    ) -> Result<TurnOutcome, WarplineError> {
        let sequence = self.sequences.allocate(&ctx.session_id, Some(ctx)).await?;
        let mut step = Step::assistant(&ctx.session_id, &ctx.run_id, sequence);
        bind_step(&mut step, ctx);

        let turn_started = Instant::now();
        let mut content = String::new();
        let mut reasoning = String::new();
        let mut accumulator = ToolCallAccumulator::new();
        let mut usage: Option<TokenUsage> = None;
        let mut first_token_ms: Option<f64> = None;

        let mut stream = self.model.stream(conversation.to_messages(), self.specs.clone());
        loop {
            let next = match effective_timeout(None, ctx.timeout_at) {
                Some(remaining) => match tokio::time::timeout(remaining, stream.next()).await {
                    Ok(item) => item,
                    Err(_) => {
                        ctx.abort.abort("timeout");
                        return Ok(TurnOutcome::Interrupted(TerminationReason::Timeout));
                    }
                },
                None => stream.next().await,
            };
            if ctx.abort.is_aborted() {
                return Ok(TurnOutcome::Interrupted(termination_for_abort(&ctx.abort)));
            }
            let Some(chunk) = next else { break };
            let chunk = chunk?;

            if first_token_ms.is_none() && !chunk.is_empty() {
                first_token_ms = Some(turn_started.elapsed().as_secs_f64() * 1000.0);
            }
            if let Some(delta) = &chunk.content {
                content.push_str(delta);
                ctx.wire
                    .write(ef.step_delta(
                        &step.id,
                        StepDelta {
                            content: Some(delta.clone()),
                            ..StepDelta::default()
                        },
                    ))
                    .await;
            }
            if let Some(delta) = &chunk.reasoning_content {
                reasoning.push_str(delta);
                ctx.wire
                    .write(ef.step_delta(
                        &step.id,
                        StepDelta {
                            reasoning_content: Some(delta.clone()),
                            ..StepDelta::default()
                        },
                    ))
                    .await;
            }
            if let Some(fragments) = &chunk.tool_calls {
                accumulator.accumulate(fragments);
                ctx.wire
                    .write(ef.step_delta(
                        &step.id,
                        StepDelta {
                            tool_calls: Some(fragments.clone()),
                            ..StepDelta::default()
                        },
                    ))
                    .await;
            }
            if let Some(chunk_usage) = chunk.usage {
                usage = Some(chunk_usage);
            }
        }

        let tool_calls = accumulator.finalize();
        step.content = (!content.is_empty()).then_some(content);
        step.reasoning_content = (!reasoning.is_empty()).then_some(reasoning);
        step.tool_calls = (!tool_calls.is_empty()).then_some(tool_calls);

        let mut metrics = StepMetrics {
            duration_ms: Some(turn_started.elapsed().as_secs_f64() * 1000.0),
            first_token_latency_ms: first_token_ms,
            model_name: Some(self.model.model_name().to_string()),
            provider: Some(self.model.provider().to_string()),
            ..StepMetrics::default()
        };
        if let Some(usage) = &usage {
            metrics.input_tokens = Some(usage.input_tokens);
            metrics.output_tokens = Some(usage.output_tokens);
            metrics.total_tokens = Some(usage.total_tokens);
            metrics.cached_tokens = usage.cached_tokens;
            metrics.cache_creation_tokens = usage.cache_creation_tokens;
            outcome.input_tokens += usage.input_tokens;
            outcome.output_tokens += usage.output_tokens;
            outcome.total_tokens += usage.total_tokens;
        }
        step.metrics = Some(metrics);

        repo.save(&step).await?;
        outcome.last_sequence = step.sequence;
        conversation.append_assistant(&step);
        ctx.wire.write(ef.step_completed(step.clone())).await;

        Ok(TurnOutcome::Completed(Box::new(step)))
    }

    /// Execute a batch of tool calls and commit one tool Step per call, in
    /// the order the model emitted them. Returns an interruption reason when
    /// the abort signal fired before the batch ran.
    async fn run_tool_batch(
        &self,
        calls: &[ToolCallData],
        conversation: &mut Conversation,
        ctx: &ExecutionContext,
        repo: &mut StepRepository,
        ef: &EventFactory,
        outcome: &mut LoopOutcome,
    ) -> Result<Option<TerminationReason>, WarplineError> {
        if ctx.abort.is_aborted() {
            return Ok(Some(termination_for_abort(&ctx.abort)));
        }

        let results = self.tools.execute_batch(calls, ctx).await;

        let mut steps = Vec::with_capacity(results.len());
        for result in &results {
            let sequence = self.sequences.allocate(&ctx.session_id, Some(ctx)).await?;
            let mut step = Step::tool_result(
                &ctx.session_id,
                &ctx.run_id,
                sequence,
                &result.tool_call_id,
                &result.tool_name,
                &result.content,
            );
            bind_step(&mut step, ctx);
            step.metrics = Some(StepMetrics {
                duration_ms: Some(result.duration_ms),
                tool_exec_time_ms: Some(result.duration_ms),
                tool_exec_started_at: Some(result.started_at),
                tool_exec_finished_at: Some(result.finished_at),
                ..StepMetrics::default()
            });
            repo.queue(step.clone()).await?;
            steps.push(step);
        }
        repo.flush().await?;

        for step in steps {
            outcome.last_sequence = step.sequence;
            conversation.append_tool_result(&step);
            ctx.wire.write(ef.step_completed(step)).await;
        }
        Ok(None)
    }
}
