//! Session-level sequence allocation.

use std::sync::Arc;

use warpline_core::{ExecutionContext, SessionStore, WarplineError};

/// Allocates the next Step sequence for a session.
///
/// Shared by every agent and workflow execution inside one session. Two
/// paths: a pre-allocated reservation stamped on the context by
/// ParallelWorkflow, or the store's atomic counter. Without a store the
/// allocator degrades to the constant 1 (persistence disabled).
#[derive(Clone, Default)]
pub struct SequenceManager {
    store: Option<Arc<dyn SessionStore>>,
}

impl SequenceManager {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store: Some(store) }
    }

    pub fn detached() -> Self {
        Self { store: None }
    }

    pub async fn allocate(
        &self,
        session_id: &str,
        ctx: Option<&ExecutionContext>,
    ) -> Result<u64, WarplineError> {
        if let Some(reserved) = ctx.and_then(ExecutionContext::take_reserved_sequence) {
            return Ok(reserved);
        }
        match &self.store {
            Some(store) => store.allocate_sequence(session_id).await,
            None => Ok(1),
        }
    }
}
