//! Top-level streaming entry: one Wire, one root context, one executor
//! task. This is the seam an HTTP layer plugs into.

use std::sync::Arc;

use futures::stream::BoxStream;
use tokio::task::JoinHandle;

use warpline_agent::RunnableExecutor;
use warpline_core::{
    ExecutionContext, RunOutput, Runnable, SessionStore, StepEvent, WarplineError, Wire,
};

pub struct StreamingRun {
    pub run_id: String,
    pub session_id: String,
    /// The Wire's reader; ends after the terminal run event.
    pub events: BoxStream<'static, StepEvent>,
    /// Resolves to the RunOutput once the outermost Runnable returns.
    pub handle: JoinHandle<Result<RunOutput, WarplineError>>,
}

/// Launch a Runnable and stream its events.
///
/// The Wire is closed here and only here, after the outermost run has
/// written its terminal event; nested executions never close it.
pub fn run_streaming(
    runnable: Arc<dyn Runnable>,
    input: impl Into<String>,
    session_id: impl Into<String>,
    store: Option<Arc<dyn SessionStore>>,
) -> StreamingRun {
    let wire = Wire::new();
    let ctx = ExecutionContext::root(session_id, wire.clone())
        .with_runnable(runnable.id(), runnable.runnable_type());
    let events = wire.read();
    let run_id = ctx.run_id.clone();
    let session_id = ctx.session_id.clone();
    let input = input.into();

    let handle = tokio::spawn(async move {
        let executor = RunnableExecutor::new(store);
        let result = executor.execute(runnable.as_ref(), &input, &ctx).await;
        ctx.wire.close().await;
        result
    });

    StreamingRun {
        run_id,
        session_id,
        events,
        handle,
    }
}
