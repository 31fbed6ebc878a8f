//! ExecutionContext - immutable identity bundle threaded through all calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use uuid::Uuid;

use crate::{AbortSignal, RunnableType, Wire};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NestingType {
    ToolCall,
    WorkflowNode,
}

/// Metadata key holding the chain of runnable ids from the root down to this
/// context, used by the nesting cycle guard.
pub const RUNNABLE_PATH_KEY: &str = "runnable_path";

/// Immutable execution context. Derivations (`child`, `with_*`) build new
/// values; nothing is ever mutated in place, so parallel branches can share a
/// parent context freely.
#[derive(Clone)]
pub struct ExecutionContext {
    pub run_id: String,
    pub session_id: String,
    pub wire: Wire,
    pub abort: AbortSignal,

    pub user_id: Option<String>,
    pub workflow_id: Option<String>,

    pub depth: u32,
    pub parent_run_id: Option<String>,

    pub runnable_type: RunnableType,
    pub runnable_id: Option<String>,
    pub nesting_type: Option<NestingType>,
    pub node_id: Option<String>,
    pub iteration: Option<u32>,

    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub parent_span_id: Option<String>,

    pub timeout_at: Option<Instant>,
    pub metadata: Arc<HashMap<String, Value>>,

    /// Single-use sequence reservation stamped by ParallelWorkflow onto each
    /// branch context before launch. Consumed by the branch's first Step.
    seq_reservation: Option<Arc<AtomicU64>>,
}

impl ExecutionContext {
    /// Top-level context for a fresh run. The wire is shared (not copied)
    /// down the whole context tree.
    pub fn root(session_id: impl Into<String>, wire: Wire) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            wire,
            abort: AbortSignal::new(),
            user_id: None,
            workflow_id: None,
            depth: 0,
            parent_run_id: None,
            runnable_type: RunnableType::Agent,
            runnable_id: None,
            nesting_type: None,
            node_id: None,
            iteration: None,
            trace_id: Some(Uuid::new_v4().to_string()),
            span_id: None,
            parent_span_id: None,
            timeout_at: None,
            metadata: Arc::new(HashMap::new()),
        seq_reservation: None,
        }
    }

    /// Derived context for a nested execution: depth + 1, fresh run id,
    /// `parent_run_id` pointing here, shared wire/abort, inherited trace id
    /// and deadline. The sequence reservation never crosses into children.
    pub fn child(
        &self,
        runnable_id: impl Into<String>,
        runnable_type: RunnableType,
        nesting_type: NestingType,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            session_id: self.session_id.clone(),
            wire: self.wire.clone(),
            abort: self.abort.clone(),
            user_id: self.user_id.clone(),
            workflow_id: self.workflow_id.clone(),
            depth: self.depth + 1,
            parent_run_id: Some(self.run_id.clone()),
            runnable_type,
            runnable_id: Some(runnable_id.into()),
            nesting_type: Some(nesting_type),
            node_id: None,
            iteration: None,
            trace_id: self.trace_id.clone(),
            span_id: None,
            parent_span_id: self.span_id.clone(),
            timeout_at: self.timeout_at,
            metadata: Arc::clone(&self.metadata),
            seq_reservation: None,
        }
    }

    pub fn with_runnable(mut self, runnable_id: impl Into<String>, runnable_type: RunnableType) -> Self {
        self.runnable_id = Some(runnable_id.into());
        self.runnable_type = runnable_type;
        self
    }

    pub fn with_workflow(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn with_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn with_iteration(mut self, iteration: u32) -> Self {
        self.iteration = Some(iteration);
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_span(mut self, span_id: impl Into<String>) -> Self {
        self.span_id = Some(span_id.into());
        self
    }

    pub fn with_timeout_at(mut self, deadline: Instant) -> Self {
        self.timeout_at = Some(deadline);
        self
    }

    /// Copy-on-write metadata update.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        let mut map = (*self.metadata).clone();
        map.insert(key.into(), value);
        self.metadata = Arc::new(map);
        self
    }

    /// Stamp a pre-allocated sequence onto this context (parallel branches).
    pub fn with_sequence_reservation(mut self, sequence: u64) -> Self {
        self.seq_reservation = Some(Arc::new(AtomicU64::new(sequence)));
        self
    }

    /// Consume the reservation, if any. Returns the reserved sequence exactly
    /// once across all clones of this context.
    pub fn take_reserved_sequence(&self) -> Option<u64> {
        self.seq_reservation
            .as_ref()
            .map(|slot| slot.swap(0, Ordering::SeqCst))
            .filter(|seq| *seq != 0)
    }

    /// Chain of runnable ids from the root down to this context.
    pub fn runnable_path(&self) -> Vec<String> {
        self.metadata
            .get(RUNNABLE_PATH_KEY)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Append a runnable id to the cycle-guard path.
    pub fn push_runnable_path(self, runnable_id: &str) -> Self {
        let mut path = self.runnable_path();
        path.push(runnable_id.to_string());
        self.with_metadata(RUNNABLE_PATH_KEY, Value::from(path))
    }

    pub fn branch_key(&self) -> Option<String> {
        self.metadata
            .get("branch_key")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    pub fn is_nested(&self) -> bool {
        self.depth > 0
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("run_id", &self.run_id)
            .field("session_id", &self.session_id)
            .field("depth", &self.depth)
            .field("parent_run_id", &self.parent_run_id)
            .field("runnable_id", &self.runnable_id)
            .finish()
    }
}
