//! Agent - a Runnable that drives the LLM ↔ tool loop.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;
use tracing::info;

use warpline_core::{
    Conversation, EventFactory, ExecutionContext, RunMetrics, RunOutput, Runnable, RunnableType,
    SessionStore, Step, StepQuery, TerminationReason, ToolCallData, Tool, WarplineError,
};
use warpline_llm::ModelClient;
use warpline_session::{SequenceManager, StepRepository};

use crate::config::AgentConfig;
use crate::executor::{bind_step, AgentExecutor, LoopOutcome};
use crate::summarizer::Summarizer;
use crate::tooling::{ToolExecutor, ToolResultCache};

/// Metadata flag set by the resume entry point: skip the fresh user Step and
/// continue from whatever the session log ends with.
pub const RESUME_KEY: &str = "resume";

pub struct Agent {
    id: String,
    system_prompt: Option<String>,
    model: Arc<dyn ModelClient>,
    tools: Vec<Arc<dyn Tool>>,
    config: AgentConfig,
    store: Option<Arc<dyn SessionStore>>,
    cache: Arc<ToolResultCache>,
}

pub struct AgentBuilder {
    id: String,
    system_prompt: Option<String>,
    model: Option<Arc<dyn ModelClient>>,
    tools: Vec<Arc<dyn Tool>>,
    config: AgentConfig,
    store: Option<Arc<dyn SessionStore>>,
    cache: Option<Arc<ToolResultCache>>,
}

impl AgentBuilder {
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn model(mut self, model: Arc<dyn ModelClient>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tools(mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Share one cache across agents so sibling branches of a session reuse
    /// each other's cacheable tool results.
    pub fn tool_cache(mut self, cache: Arc<ToolResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn build(self) -> Result<Agent, WarplineError> {
        let model = self
            .model
            .ok_or_else(|| WarplineError::InvalidConfig("agent requires a model".to_string()))?;
        Ok(Agent {
            id: self.id,
            system_prompt: self.system_prompt,
            model,
            tools: self.tools,
            config: self.config,
            store: self.store,
            cache: self.cache.unwrap_or_default(),
        })
    }
}

impl Agent {
    pub fn builder(id: impl Into<String>) -> AgentBuilder {
        AgentBuilder {
            id: id.into(),
            system_prompt: None,
            model: None,
            tools: Vec::new(),
            config: AgentConfig::default(),
            store: None,
            cache: None,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    fn sequences(&self) -> SequenceManager {
        match &self.store {
            Some(store) => SequenceManager::new(Arc::clone(store)),
            None => SequenceManager::detached(),
        }
    }

    fn is_resume(ctx: &ExecutionContext) -> bool {
        ctx.metadata
            .get(RESUME_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    async fn prepare_fresh(
        &self,
        input: &str,
        ctx: &ExecutionContext,
        sequences: &SequenceManager,
        repo: &StepRepository,
    ) -> Result<Conversation, WarplineError> {
        let sequence = sequences.allocate(&ctx.session_id, Some(ctx)).await?;
        let mut user_step = Step::user(&ctx.session_id, &ctx.run_id, sequence, input);
        bind_step(&mut user_step, ctx);
        repo.save(&user_step).await?;

        if let Some(store) = &self.store {
            // History scoped to this run; the user Step just written is the
            // first entry, nested runs in the same session stay invisible.
            let steps = store
                .get_steps(&ctx.session_id, &StepQuery::for_run(&ctx.run_id))
                .await?;
            Ok(Conversation::from_steps(self.system_prompt.as_deref(), &steps))
        } else {
            let mut conversation = Conversation::new(self.system_prompt.as_deref());
            conversation.push_user(input);
            Ok(conversation)
        }
    }

    async fn prepare_resume(
        &self,
        ctx: &ExecutionContext,
    ) -> Result<(Conversation, Option<Vec<ToolCallData>>), WarplineError> {
        let store = self.store.as_ref().ok_or_else(|| {
            WarplineError::InvalidConfig("resume requires a session store".to_string())
        })?;
        let steps = store
            .get_steps(&ctx.session_id, &StepQuery::default())
            .await?;
        if steps.is_empty() {
            return Err(WarplineError::NotFound(format!(
                "session '{}' has no steps",
                ctx.session_id
            )));
        }
        let pending = steps
            .last()
            .filter(|step| step.has_tool_calls())
            .and_then(|step| step.tool_calls.clone());
        let conversation = Conversation::from_steps(self.system_prompt.as_deref(), &steps);
        Ok((conversation, pending))
    }

    fn build_metrics(&self, outcome: &LoopOutcome, started: Instant) -> RunMetrics {
        RunMetrics {
            duration_ms: Some(started.elapsed().as_secs_f64() * 1000.0),
            total_tokens: outcome.total_tokens,
            input_tokens: outcome.input_tokens,
            output_tokens: outcome.output_tokens,
            tool_call_count: outcome.tool_call_count,
        }
    }
}

#[async_trait]
impl Runnable for Agent {
    fn id(&self) -> &str {
        &self.id
    }

    fn runnable_type(&self) -> RunnableType {
        RunnableType::Agent
    }

    async fn run(&self, input: &str, ctx: &ExecutionContext) -> Result<RunOutput, WarplineError> {
        let started = Instant::now();
        let ef = EventFactory::new(ctx);
        let sequences = self.sequences();
        let mut repo = StepRepository::new(self.store.clone());

        let (mut conversation, pending) = if Self::is_resume(ctx) {
            self.prepare_resume(ctx).await?
        } else {
            (
                self.prepare_fresh(input, ctx, &sequences, &repo).await?,
                None,
            )
        };

        let specs = (!self.tools.is_empty())
            .then(|| self.tools.iter().map(|tool| tool.spec()).collect::<Vec<_>>());
        let tool_executor = ToolExecutor::new(&self.tools, Arc::clone(&self.cache))
            .with_default_timeout(self.config.tool_timeout);
        let executor = AgentExecutor::new(
            Arc::clone(&self.model),
            tool_executor,
            specs,
            self.config.clone(),
            sequences.clone(),
        );

        let outcome = match executor
            .run_loop(&mut conversation, ctx, &mut repo, &ef, pending)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                repo.discard();
                return Err(err);
            }
        };

        let mut metrics = self.build_metrics(&outcome, started);
        let mut response = conversation.last_assistant_content().map(str::to_string);

        if let Some(reason) = outcome.termination {
            if self.config.enable_termination_summary {
                let summarizer = Summarizer {
                    model: &self.model,
                    sequences: &sequences,
                    prompt_template: self.config.termination_summary_prompt.as_deref(),
                };
                let summary = summarizer
                    .generate(
                        &mut conversation,
                        ctx,
                        &mut repo,
                        &ef,
                        outcome.pending_tool_calls.as_deref(),
                        reason,
                    )
                    .await?;
                metrics.total_tokens += summary.usage.total_tokens;
                metrics.input_tokens += summary.usage.input_tokens;
                metrics.output_tokens += summary.usage.output_tokens;
                metrics.duration_ms = Some(started.elapsed().as_secs_f64() * 1000.0);
                response = Some(summary.summary);
            } else if matches!(
                reason,
                TerminationReason::Cancelled | TerminationReason::Timeout
            ) {
                repo.discard();
                return Err(ctx.abort.as_error());
            }
        }

        repo.flush().await?;
        info!(
            agent = %self.id,
            turns = outcome.assistant_turns,
            termination = ?outcome.termination,
            "agent run finished"
        );

        Ok(RunOutput {
            response,
            run_id: ctx.run_id.clone(),
            session_id: ctx.session_id.clone(),
            metrics: Some(metrics),
            termination_reason: outcome.termination,
            error: None,
            workflow_id: ctx.workflow_id.clone(),
        })
    }
}
