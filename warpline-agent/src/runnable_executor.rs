//! Run lifecycle wrapper around any Runnable.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info};

use warpline_core::{
    EventFactory, ExecutionContext, Run, RunOutput, RunStatus, Runnable, SessionStore,
    WarplineError,
};

/// Wraps `Runnable::run` with the Run record and its lifecycle events.
/// Never inspects the Runnable's internals, which is what keeps agents and
/// workflows interchangeable at every nesting point.
#[derive(Clone, Default)]
pub struct RunnableExecutor {
    store: Option<Arc<dyn SessionStore>>,
}

impl RunnableExecutor {
    pub fn new(store: Option<Arc<dyn SessionStore>>) -> Self {
        Self { store }
    }

    pub async fn execute(
        &self,
        runnable: &dyn Runnable,
        input: &str,
        ctx: &ExecutionContext,
    ) -> Result<RunOutput, WarplineError> {
        let ef = EventFactory::new(ctx);
        let mut run = Run {
            id: ctx.run_id.clone(),
            runnable_id: runnable.id().to_string(),
            runnable_type: runnable.runnable_type(),
            session_id: ctx.session_id.clone(),
            input_query: input.to_string(),
            status: RunStatus::Running,
            response: None,
            metrics: Default::default(),
            user_id: ctx.user_id.clone(),
            workflow_id: ctx.workflow_id.clone(),
            parent_run_id: ctx.parent_run_id.clone(),
            started_at: Utc::now(),
            finished_at: None,
        };
        if let Some(store) = &self.store {
            store.save_run(&run).await?;
        }

        info!(
            run_id = %run.id,
            runnable_id = %run.runnable_id,
            depth = ctx.depth,
            "run started"
        );
        ctx.wire.write(ef.run_started(input)).await;

        match runnable.run(input, ctx).await {
            Ok(output) => {
                let finished_at = Utc::now();
                run.status = RunStatus::Completed;
                run.response = output.response.clone();
                run.finished_at = Some(finished_at);
                if let Some(metrics) = &output.metrics {
                    run.metrics = metrics.clone();
                }
                run.metrics.duration_ms =
                    Some((finished_at - run.started_at).num_milliseconds() as f64);

                ctx.wire
                    .write(ef.run_completed(
                        output.response.as_deref().unwrap_or(""),
                        output.metrics.as_ref(),
                        output.termination_reason,
                    ))
                    .await;

                if let Some(store) = &self.store {
                    store.save_run(&run).await?;
                }
                info!(run_id = %run.id, tokens = run.metrics.total_tokens, "run completed");
                Ok(output)
            }
            Err(err) => {
                let finished_at = Utc::now();
                run.status = if matches!(err, WarplineError::Cancelled(_)) {
                    RunStatus::Cancelled
                } else {
                    RunStatus::Failed
                };
                run.finished_at = Some(finished_at);
                run.metrics.duration_ms =
                    Some((finished_at - run.started_at).num_milliseconds() as f64);

                error!(run_id = %run.id, %err, "run failed");
                ctx.wire.write(ef.run_failed(&err)).await;

                if let Some(store) = &self.store {
                    if let Err(save_err) = store.save_run(&run).await {
                        error!(run_id = %run.id, %save_err, "failed to persist failed run");
                    }
                }
                Err(err)
            }
        }
    }
}
