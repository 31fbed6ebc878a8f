//! TraceStore - persistence interface for reconstructed traces.

use async_trait::async_trait;
use dashmap::DashMap;

use warpline_core::WarplineError;

use crate::model::Trace;

#[derive(Clone, Debug, Default)]
pub struct TraceQuery {
    pub session_id: Option<String>,
    pub runnable_id: Option<String>,
    pub limit: Option<usize>,
}

#[async_trait]
pub trait TraceStore: Send + Sync {
    async fn save_trace(&self, trace: &Trace) -> Result<(), WarplineError>;

    async fn get_trace(&self, trace_id: &str) -> Result<Option<Trace>, WarplineError>;

    async fn query_traces(&self, query: &TraceQuery) -> Result<Vec<Trace>, WarplineError>;
}

/// Concurrent in-memory store; saves are upserts, so incremental checkpoint
/// saves simply overwrite the previous snapshot.
#[derive(Default)]
pub struct InMemoryTraceStore {
    traces: DashMap<String, Trace>,
}

impl InMemoryTraceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TraceStore for InMemoryTraceStore {
    async fn save_trace(&self, trace: &Trace) -> Result<(), WarplineError> {
        self.traces.insert(trace.trace_id.clone(), trace.clone());
        Ok(())
    }

    async fn get_trace(&self, trace_id: &str) -> Result<Option<Trace>, WarplineError> {
        Ok(self.traces.get(trace_id).map(|entry| entry.clone()))
    }

    async fn query_traces(&self, query: &TraceQuery) -> Result<Vec<Trace>, WarplineError> {
        let mut traces: Vec<Trace> = self
            .traces
            .iter()
            .filter(|entry| {
                query
                    .session_id
                    .as_ref()
                    .map(|session_id| entry.session_id.as_ref() == Some(session_id))
                    .unwrap_or(true)
                    && query
                        .runnable_id
                        .as_ref()
                        .map(|runnable_id| entry.runnable_id.as_ref() == Some(runnable_id))
                        .unwrap_or(true)
            })
            .map(|entry| entry.clone())
            .collect();
        traces.sort_by_key(|trace| trace.started_at);
        if let Some(limit) = query.limit {
            traces.truncate(limit);
        }
        Ok(traces)
    }
}
