//! ParallelWorkflow - concurrent fan-out over branches with merged results.
//!
//! Sequence seeds are pre-allocated in branch declaration order before any
//! branch launches, and each branch's first Step consumes its seed. Later
//! Steps go through the normal atomic allocator, so global monotonicity
//! holds while the head of every branch stays deterministic.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::task::JoinSet;
use tracing::{info, warn};

use warpline_core::{
    EventFactory, ExecutionContext, RunOutput, Runnable, RunnableRegistry, RunnableType,
    SessionStore, WarplineError,
};
use warpline_agent::RunnableExecutor;
use warpline_session::SequenceManager;

use crate::node::{validate_nodes, WorkflowNode};
use crate::node_child_context;
use crate::outputs::OutputMap;
use crate::template::InputTemplate;

pub struct ParallelWorkflow {
    id: String,
    nodes: Vec<WorkflowNode>,
    merge_template: Option<InputTemplate>,
    registry: Option<Arc<RunnableRegistry>>,
    store: Option<Arc<dyn SessionStore>>,
    executor: RunnableExecutor,
}

impl ParallelWorkflow {
    pub fn new(id: impl Into<String>, nodes: Vec<WorkflowNode>) -> Result<Self, WarplineError> {
        let id = id.into();
        validate_nodes(&id, &nodes)?;
        Ok(Self {
            id,
            nodes,
            merge_template: None,
            registry: None,
            store: None,
            executor: RunnableExecutor::new(None),
        })
    }

    /// Template over branch ids, e.g. `"EN:{en}\nDE:{de}"`. Without one,
    /// outputs concatenate as `[branch_id]:\n<output>` blocks.
    pub fn with_merge_template(mut self, template: impl Into<String>) -> Self {
        self.merge_template = Some(InputTemplate::new(template));
        self
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

    fn sequences(&self) -> SequenceManager {
        match &self.store {
            Some(store) => SequenceManager::new(Arc::clone(store)),
            None => SequenceManager::detached(),
        }
    }

    fn merge(&self, input: &str, outputs_by_branch: &HashMap<String, String>) -> String {
        if let Some(template) = &self.merge_template {
            let mut scope = json!({ "input": input });
            for (branch_id, output) in outputs_by_branch {
                scope[branch_id] = Value::String(output.clone());
            }
            return template.render(&scope);
        }
        self.nodes
            .iter()
            .filter_map(|node| {
                outputs_by_branch
                    .get(&node.id)
                    .map(|output| format!("[{}]:\n{output}", node.id))
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[async_trait]
impl Runnable for ParallelWorkflow {
    fn id(&self) -> &str {
        &self.id
    }

    fn runnable_type(&self) -> RunnableType {
        RunnableType::Workflow
    }

    async fn run(&self, input: &str, ctx: &ExecutionContext) -> Result<RunOutput, WarplineError> {
        let ef = EventFactory::new(ctx);
        let initial = OutputMap::new(input);
        let sequences = self.sequences();

        // Seeds first, in declaration order, before anything launches.
        let mut launches = Vec::new();
        for node in &self.nodes {
            if !node.should_execute(initial.scope()) {
                ctx.wire
                    .write(ef.stage_skipped(
                        &node.id,
                        node.condition.as_ref().map(|condition| condition.raw()),
                    ))
                    .await;
                continue;
            }
            let runnable = node.resolve(self.registry.as_deref())?;
            let seed = sequences.allocate(&ctx.session_id, None).await?;
            let child_ctx = node_child_context(ctx, &self.id, &node.id, runnable.as_ref(), None)
                .with_metadata("branch_key", Value::String(node.id.clone()))
                .with_sequence_reservation(seed);
            // Branch isolation: every branch renders against the initial
            // snapshot, never against sibling outputs.
            let rendered = node.input_template.render(initial.scope());
            launches.push((node.id.clone(), runnable, child_ctx, rendered));
        }

        let mut join_set = JoinSet::new();
        for (branch_id, runnable, child_ctx, rendered) in launches {
            ctx.wire.write(ef.branch_started(&branch_id)).await;
            let executor = self.executor.clone();
            join_set.spawn(async move {
                let result = executor
                    .execute(runnable.as_ref(), &rendered, &child_ctx)
                    .await;
                (branch_id, result)
            });
        }

        // Every branch is awaited before failure is reported, so no task is
        // left writing into the wire after the workflow returns.
        let mut outputs_by_branch = HashMap::new();
        let mut failures: Vec<(String, WarplineError)> = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((branch_id, Ok(output))) => {
                    let response = output.response.unwrap_or_default();
                    ctx.wire
                        .write(ef.branch_completed(&branch_id, response.len()))
                        .await;
                    outputs_by_branch.insert(branch_id, response);
                }
                Ok((branch_id, Err(err))) => {
                    warn!(workflow = %self.id, branch = %branch_id, %err, "branch failed");
                    failures.push((branch_id, err));
                }
                Err(join_err) => {
                    failures.push(("<task>".to_string(), WarplineError::Workflow(join_err.to_string())));
                }
            }
        }

        if !failures.is_empty() {
            let detail = failures
                .iter()
                .map(|(branch_id, err)| format!("{branch_id}: {err}"))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(WarplineError::Workflow(format!(
                "parallel branches failed: {detail}"
            )));
        }

        let merged = self.merge(input, &outputs_by_branch);
        info!(workflow = %self.id, branches = outputs_by_branch.len(), "parallel merge complete");

        Ok(RunOutput {
            response: Some(merged),
            run_id: ctx.run_id.clone(),
            session_id: ctx.session_id.clone(),
            metrics: None,
            termination_reason: None,
            error: None,
            workflow_id: Some(self.id.clone()),
        })
    }
}
