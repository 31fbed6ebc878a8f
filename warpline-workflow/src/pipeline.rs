//! PipelineWorkflow - sequential node execution with idempotent resume.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

use warpline_core::{
    EventFactory, ExecutionContext, RunOutput, Runnable, RunnableRegistry, RunnableType,
    SessionStore, StepQuery, WarplineError,
};
use warpline_agent::RunnableExecutor;

use crate::node::{validate_nodes, WorkflowNode};
use crate::node_child_context;
use crate::outputs::OutputMap;

pub struct PipelineWorkflow {
    id: String,
    nodes: Vec<WorkflowNode>,
    registry: Option<Arc<RunnableRegistry>>,
    store: Option<Arc<dyn SessionStore>>,
    executor: RunnableExecutor,
}

impl PipelineWorkflow {
    pub fn new(id: impl Into<String>, nodes: Vec<WorkflowNode>) -> Result<Self, WarplineError> {
        let id = id.into();
        validate_nodes(&id, &nodes)?;
        Ok(Self {
            id,
            nodes,
            registry: None,
            store: None,
            executor: RunnableExecutor::new(None),
        })
    }

    pub fn with_registry(mut self, registry: Arc<RunnableRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.executor = RunnableExecutor::new(Some(Arc::clone(&store)));
        self.store = Some(store);
        self
    }

    pub fn nodes(&self) -> &[WorkflowNode] {
        &self.nodes
    }

    /// A node whose terminal assistant Step already exists in this session
    /// does not re-execute; its previous output is reused. This is what
    /// makes re-running a partially completed workflow cheap.
    async fn cached_output(
        &self,
        ctx: &ExecutionContext,
        node: &WorkflowNode,
    ) -> Result<Option<String>, WarplineError> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        let steps = store
            .get_steps(
                &ctx.session_id,
                &StepQuery::for_workflow_node(&self.id, &node.id),
            )
            .await?;
        Ok(steps
            .iter()
            .rev()
            .find(|step| step.is_assistant() && !step.has_tool_calls())
            .map(|step| step.content.clone().unwrap_or_default()))
    }
}

#[async_trait]
impl Runnable for PipelineWorkflow {
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

        for node in &self.nodes {
            ctx.abort.check()?;

            if let Some(cached) = self.cached_output(ctx, node).await? {
                debug!(workflow = %self.id, node = %node.id, "node already complete, reusing output");
                outputs.set_node_output(&node.id, &cached);
                final_output = cached;
                ctx.wire
                    .write(ef.stage_completed(&node.id, json!({ "cached": true })))
                    .await;
                continue;
            }

            if !node.should_execute(outputs.scope()) {
                ctx.wire
                    .write(ef.stage_skipped(
                        &node.id,
                        node.condition.as_ref().map(|condition| condition.raw()),
                    ))
                    .await;
                continue;
            }

            ctx.wire.write(ef.stage_started(&node.id)).await;

            let rendered = node.input_template.render(outputs.scope());
            let runnable = node.resolve(self.registry.as_deref())?;
            let child_ctx = node_child_context(ctx, &self.id, &node.id, runnable.as_ref(), None);

            let result = self
                .executor
                .execute(runnable.as_ref(), &rendered, &child_ctx)
                .await?;
            let response = result.response.unwrap_or_default();

            outputs.set_node_output(&node.id, &response);
            final_output = response.clone();

            ctx.wire
                .write(ef.stage_completed(&node.id, json!({ "output_length": response.len() })))
                .await;
        }

        info!(workflow = %self.id, nodes = self.nodes.len(), "pipeline finished");
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
