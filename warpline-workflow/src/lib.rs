//! Workflow engines over the Runnable contract: sequential pipeline,
//! conditional loop, and parallel fan-out/merge. Nodes are pure
//! configuration; children execute through the same Run lifecycle wrapper
//! as everything else and stream into the same Wire.

mod condition;
mod loops;
mod node;
mod outputs;
mod parallel;
mod pipeline;
mod template;

pub use condition::Condition;
pub use loops::LoopWorkflow;
pub use node::{NodeRunnable, WorkflowNode};
pub use outputs::OutputMap;
pub use parallel::ParallelWorkflow;
pub use pipeline::PipelineWorkflow;
pub use template::{resolve_path, InputTemplate};

use warpline_core::{ExecutionContext, NestingType, Runnable};

/// Derived context for a workflow's child run: node binding, incremented
/// depth, and the workflow pushed onto the cycle-guard path.
pub(crate) fn node_child_context(
    ctx: &ExecutionContext,
    workflow_id: &str,
    node_id: &str,
    runnable: &dyn Runnable,
    iteration: Option<u32>,
) -> ExecutionContext {
    let mut base = ctx.clone();
    if let Some(current) = &ctx.runnable_id {
        base = base.push_runnable_path(current);
    }
    let mut child = base
        .child(runnable.id(), runnable.runnable_type(), NestingType::WorkflowNode)
        .with_workflow(workflow_id)
        .with_node(node_id);
    if let Some(iteration) = iteration {
        child = child.with_iteration(iteration);
    }
    child
}
