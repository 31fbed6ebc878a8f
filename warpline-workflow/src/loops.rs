//! LoopWorkflow - iterate the node list until the condition turns false or
//! the iteration cap is hit.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use warpline_core::{
    EventFactory, ExecutionContext, RunOutput, Runnable, RunnableRegistry, RunnableType,
    SessionStore, WarplineError,
};
use warpline_agent::RunnableExecutor;

use crate::node::{validate_nodes, WorkflowNode};
use crate::node_child_context;
use crate::outputs::OutputMap;
use crate::condition::Condition;

pub struct LoopWorkflow {
    id: String,
    nodes: Vec<WorkflowNode>,
    condition: Condition,
    max_iterations: u32,
    registry: Option<Arc<RunnableRegistry>>,
    executor: RunnableExecutor,
}

impl LoopWorkflow {
    pub fn new(
        id: impl Into<String>,
        nodes: Vec<WorkflowNode>,
        condition: &str,
        max_iterations: u32,
    ) -> Result<Self, WarplineError> {
        let id = id.into();
        validate_nodes(&id, &nodes)?;
        if max_iterations == 0 {
            return Err(WarplineError::InvalidConfig(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            id,
            nodes,
            condition: Condition::parse(condition)?,
            max_iterations,
            registry: None,
            executor: RunnableExecutor::new(None),
        })
    }

    pub fn with_registry(mut self, registry: Arc<RunnableRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.executor = RunnableExecutor::new(Some(store));
        self
    }
}

#[async_trait]
impl Runnable for LoopWorkflow {
    fn id(&self) -> &str {
        &self.id
    }

    fn runnable_type(&self) -> RunnableType {
        RunnableType::Workflow
    }

    async fn run(&self, input: &str, ctx: &ExecutionContext) -> Result<RunOutput, WarplineError> {
        let ef = EventFactory::new(ctx);
        let mut outputs = OutputMap::new(input);
        let mut final_output = String::new();
        let mut iteration = 0u32;
        let mut capped = false;

        loop {
            ctx.abort.check()?;
            iteration += 1;
            outputs.start_iteration(iteration);
            ctx.wire
                .write(ef.iteration_started(iteration, self.max_iterations))
                .await;

            for node in &self.nodes {
                ctx.abort.check()?;

                if !node.should_execute(outputs.scope()) {
                    let mut event = ef.stage_skipped(
                        &node.id,
                        node.condition.as_ref().map(|condition| condition.raw()),
                    );
                    event.iteration = Some(iteration);
                    ctx.wire.write(event).await;
                    continue;
                }

                let mut event = ef.stage_started(&node.id);
                event.iteration = Some(iteration);
                ctx.wire.write(event).await;

                let rendered = node.input_template.render(outputs.scope());
                let runnable = node.resolve(self.registry.as_deref())?;
                let child_ctx =
                    node_child_context(ctx, &self.id, &node.id, runnable.as_ref(), Some(iteration));

                let result = self
                    .executor
                    .execute(runnable.as_ref(), &rendered, &child_ctx)
                    .await?;
                let response = result.response.unwrap_or_default();
                outputs.set_node_output(&node.id, &response);
                final_output = response.clone();

                let mut event =
                    ef.stage_completed(&node.id, json!({ "output_length": response.len() }));
                event.iteration = Some(iteration);
                ctx.wire.write(event).await;
            }

            if !self.condition.evaluate(outputs.scope()) {
                break;
            }
            if iteration >= self.max_iterations {
                capped = true;
                break;
            }
        }

        info!(workflow = %self.id, iterations = iteration, capped, "loop finished");
        Ok(RunOutput {
            response: Some(final_output),
            run_id: ctx.run_id.clone(),
            session_id: ctx.session_id.clone(),
            metrics: None,
            termination_reason: None,
            error: None,
            workflow_id: Some(self.id.clone()),
        })
    }
}
