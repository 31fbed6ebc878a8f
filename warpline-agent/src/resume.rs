//! Resume and retry over the persisted Step log.

use std::sync::Arc;

use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use warpline_core::{
    ExecutionContext, Role, RunOutput, RunnableRegistry, SessionStore, Step, StepQuery,
    WarplineError, Wire,
};
use warpline_session::truncate_from;

use crate::agent::RESUME_KEY;
use crate::runnable_executor::RunnableExecutor;

/// What the Step log says about a session's progress.
#[derive(Debug)]
pub struct ExecutionState {
    pub is_completed: bool,
    pub has_pending_tools: bool,
    pub runnable_id: Option<String>,
    pub last_sequence: u64,
    pub final_output: Option<String>,
}

pub fn analyze_steps(steps: &[Step]) -> ExecutionState {
    let Some(last) = steps.last() else {
        return ExecutionState {
            is_completed: false,
            has_pending_tools: false,
            runnable_id: None,
            last_sequence: 0,
            final_output: None,
        };
    };
    let has_pending_tools = last.has_tool_calls();
    let is_completed = last.role == Role::Assistant && !has_pending_tools;
    ExecutionState {
        is_completed,
        has_pending_tools,
        runnable_id: last.runnable_id.clone(),
        last_sequence: last.sequence,
        final_output: is_completed.then(|| last.content.clone().unwrap_or_default()),
    }
}

/// Re-dispatches sessions from their Step log: resume where a run stopped,
/// or retry from an earlier sequence after truncation.
pub struct ResumeExecutor {
    store: Arc<dyn SessionStore>,
    registry: Arc<RunnableRegistry>,
}

impl ResumeExecutor {
    pub fn new(store: Arc<dyn SessionStore>, registry: Arc<RunnableRegistry>) -> Self {
        Self { store, registry }
    }

    /// Resume a session. The runnable is inferred from the last Step when
    /// not given. Already-complete sessions return their final answer
    /// without re-executing anything.
    pub async fn resume_session(
        &self,
        session_id: &str,
        runnable_id: Option<&str>,
        wire: Wire,
    ) -> Result<RunOutput, WarplineError> {
        let steps = self
            .store
            .get_steps(session_id, &StepQuery::default())
            .await?;
        if steps.is_empty() {
            return Err(WarplineError::NotFound(format!(
                "session '{session_id}' has no steps"
            )));
        }

        let state = analyze_steps(&steps);
        info!(
            session_id,
            completed = state.is_completed,
            pending_tools = state.has_pending_tools,
            "resume state analysed"
        );

        if state.is_completed {
            return Ok(RunOutput {
                response: state.final_output,
                run_id: Uuid::new_v4().to_string(),
                session_id: session_id.to_string(),
                ..RunOutput::default()
            });
        }

        let runnable_id = runnable_id
            .map(str::to_string)
            .or(state.runnable_id)
            .ok_or_else(|| {
                WarplineError::NotFound(
                    "cannot infer runnable from steps; pass runnable_id explicitly".to_string(),
                )
            })?;
        let runnable = self.registry.require(&runnable_id)?;

        let ctx = ExecutionContext::root(session_id, wire)
            .with_runnable(&runnable_id, runnable.runnable_type())
            .with_metadata(RESUME_KEY, Value::Bool(true));

        let input = steps
            .iter()
            .find(|step| step.role == Role::User)
            .and_then(|step| step.content.clone())
            .unwrap_or_default();

        let executor = RunnableExecutor::new(Some(Arc::clone(&self.store)));
        executor.execute(runnable.as_ref(), &input, &ctx).await
    }

    /// Retry: drop Steps with `sequence >= from_sequence`, then resume from
    /// whatever the log now ends with.
    pub async fn retry_from_sequence(
        &self,
        session_id: &str,
        from_sequence: u64,
        runnable_id: Option<&str>,
        wire: Wire,
    ) -> Result<RunOutput, WarplineError> {
        truncate_from(self.store.as_ref(), session_id, from_sequence).await?;
        self.resume_session(session_id, runnable_id, wire).await
    }
}
