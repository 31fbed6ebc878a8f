//! EventFactory - the one sanctioned event constructor outside tests.
//!
//! Binds an ExecutionContext so every emitted event carries the same
//! identity, nesting and tracing fields without repeating parameter lists at
//! every call site.

use serde_json::{json, Value};

use crate::{
    ExecutionContext, RunMetrics, Step, StepDelta, StepEvent, StepEventType, TerminationReason,
    WarplineError,
};

pub struct EventFactory {
    ctx: ExecutionContext,
}

impl EventFactory {
    pub fn new(ctx: &ExecutionContext) -> Self {
        Self { ctx: ctx.clone() }
    }

    fn stamped(&self, event_type: StepEventType) -> StepEvent {
        let mut event = StepEvent::new(event_type, self.ctx.run_id.clone());
        event.depth = self.ctx.depth;
        event.parent_run_id = self.ctx.parent_run_id.clone();
        event.runnable_id = self.ctx.runnable_id.clone();
        event.runnable_type = Some(self.ctx.runnable_type);
        event.nesting_type = self.ctx.nesting_type;
        event.trace_id = self.ctx.trace_id.clone();
        event.span_id = self.ctx.span_id.clone();
        event.parent_span_id = self.ctx.parent_span_id.clone();
        event.node_id = self.ctx.node_id.clone();
        event.iteration = self.ctx.iteration;
        event
    }

    pub fn run_started(&self, input: &str) -> StepEvent {
        let mut event = self.stamped(StepEventType::RunStarted);
        event.data = Some(json!({
            "input": input,
            "session_id": self.ctx.session_id,
            "workflow_id": self.ctx.workflow_id,
        }));
        event
    }

    pub fn run_completed(
        &self,
        response: &str,
        metrics: Option<&RunMetrics>,
        termination_reason: Option<TerminationReason>,
    ) -> StepEvent {
        let mut event = self.stamped(StepEventType::RunCompleted);
        event.data = Some(json!({
            "response": response,
            "metrics": metrics,
            "termination_reason": termination_reason,
        }));
        event
    }

    pub fn run_failed(&self, error: &WarplineError) -> StepEvent {
        let mut event = self.stamped(StepEventType::RunFailed);
        event.data = Some(json!({
            "error": error.to_string(),
            "error_type": error.kind(),
        }));
        event
    }

    pub fn step_delta(&self, step_id: &str, delta: StepDelta) -> StepEvent {
        let mut event = self.stamped(StepEventType::StepDelta);
        event.step_id = Some(step_id.to_string());
        event.delta = Some(delta);
        event
    }

    pub fn step_completed(&self, step: Step) -> StepEvent {
        let mut event = self.stamped(StepEventType::StepCompleted);
        event.step_id = Some(step.id.clone());
        event.snapshot = Some(step);
        event
    }

    pub fn stage_started(&self, node_id: &str) -> StepEvent {
        let mut event = self.stamped(StepEventType::StageStarted);
        event.node_id = Some(node_id.to_string());
        event
    }

    pub fn stage_completed(&self, node_id: &str, data: Value) -> StepEvent {
        let mut event = self.stamped(StepEventType::StageCompleted);
        event.node_id = Some(node_id.to_string());
        event.data = Some(data);
        event
    }

    pub fn stage_skipped(&self, node_id: &str, condition: Option<&str>) -> StepEvent {
        let mut event = self.stamped(StepEventType::StageSkipped);
        event.node_id = Some(node_id.to_string());
        event.data = Some(json!({ "condition": condition }));
        event
    }

    pub fn iteration_started(&self, iteration: u32, max_iterations: u32) -> StepEvent {
        let mut event = self.stamped(StepEventType::IterationStarted);
        event.iteration = Some(iteration);
        event.data = Some(json!({ "max_iterations": max_iterations }));
        event
    }

    pub fn branch_started(&self, branch_id: &str) -> StepEvent {
        let mut event = self.stamped(StepEventType::BranchStarted);
        event.branch_id = Some(branch_id.to_string());
        event
    }

    pub fn branch_completed(&self, branch_id: &str, output_len: usize) -> StepEvent {
        let mut event = self.stamped(StepEventType::BranchCompleted);
        event.branch_id = Some(branch_id.to_string());
        event.data = Some(json!({ "output_length": output_len }));
        event
    }

    pub fn error(&self, message: &str) -> StepEvent {
        let mut event = self.stamped(StepEventType::Error);
        event.data = Some(json!({ "error": message }));
        event
    }
}
