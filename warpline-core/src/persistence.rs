//! SessionStore - the narrow persistence interface the runtime core needs.
//!
//! An in-memory implementation lives in `warpline-session`; production
//! backends persist to a document store behind the same trait.

use async_trait::async_trait;

use crate::{Run, Step, WarplineError};

/// Filter for `get_steps`. All criteria are conjunctive; `Default` selects
/// the whole session in sequence order.
#[derive(Clone, Debug, Default)]
pub struct StepQuery {
    pub run_id: Option<String>,
    pub runnable_id: Option<String>,
    pub workflow_id: Option<String>,
    pub node_id: Option<String>,
    pub start_seq: Option<u64>,
    pub end_seq: Option<u64>,
    pub limit: Option<usize>,
}

impl StepQuery {
    pub fn for_run(run_id: impl Into<String>) -> Self {
        Self {
            run_id: Some(run_id.into()),
            ..Self::default()
        }
    }

    pub fn for_workflow_node(workflow_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            workflow_id: Some(workflow_id.into()),
            node_id: Some(node_id.into()),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug)]
pub struct RunQuery {
    pub user_id: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for RunQuery {
    fn default() -> Self {
        Self {
            user_id: None,
            limit: 50,
            offset: 0,
        }
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save_step(&self, step: &Step) -> Result<(), WarplineError>;

    async fn save_steps_batch(&self, steps: &[Step]) -> Result<(), WarplineError>;

    /// Steps ordered by sequence, filtered by the query.
    async fn get_steps(&self, session_id: &str, query: &StepQuery) -> Result<Vec<Step>, WarplineError>;

    async fn get_last_step(&self, session_id: &str) -> Result<Option<Step>, WarplineError>;

    /// Delete steps with `sequence >= start_seq`; returns how many went.
    async fn delete_steps(&self, session_id: &str, start_seq: u64) -> Result<u64, WarplineError>;

    /// Atomic monotonic counter per session. The only strongly-shared
    /// mutable resource in the system.
    async fn allocate_sequence(&self, session_id: &str) -> Result<u64, WarplineError>;

    async fn save_run(&self, run: &Run) -> Result<(), WarplineError>;

    async fn get_run(&self, run_id: &str) -> Result<Option<Run>, WarplineError>;

    async fn list_runs(&self, query: &RunQuery) -> Result<Vec<Run>, WarplineError>;
}
