//! In-memory SessionStore. Good for tests and single-process deployments;
//! production backends implement the same trait over a document store.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use warpline_core::{Run, RunQuery, SessionStore, Step, StepQuery, WarplineError};

#[derive(Default)]
struct SessionState {
    steps: Vec<Step>,
    counter: u64,
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, SessionState>>,
    runs: Mutex<Vec<Run>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches(step: &Step, query: &StepQuery) -> bool {
    if let Some(run_id) = &query.run_id {
        if &step.run_id != run_id {
            return false;
        }
    }
    if let Some(runnable_id) = &query.runnable_id {
        if step.runnable_id.as_ref() != Some(runnable_id) {
            return false;
        }
    }
    if let Some(workflow_id) = &query.workflow_id {
        if step.workflow_id.as_ref() != Some(workflow_id) {
            return false;
        }
    }
    if let Some(node_id) = &query.node_id {
        if step.node_id.as_ref() != Some(node_id) {
            return false;
        }
    }
    if let Some(start) = query.start_seq {
        if step.sequence < start {
            return false;
        }
    }
    if let Some(end) = query.end_seq {
        if step.sequence > end {
            return false;
        }
    }
    true
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn save_step(&self, step: &Step) -> Result<(), WarplineError> {
        let mut sessions = self.sessions.lock().expect("session store lock");
        let state = sessions.entry(step.session_id.clone()).or_default();
        state.steps.push(step.clone());
        Ok(())
    }

    async fn save_steps_batch(&self, steps: &[Step]) -> Result<(), WarplineError> {
        let mut sessions = self.sessions.lock().expect("session store lock");
        for step in steps {
            let state = sessions.entry(step.session_id.clone()).or_default();
            state.steps.push(step.clone());
        }
        Ok(())
    }

    async fn get_steps(
        &self,
        session_id: &str,
        query: &StepQuery,
    ) -> Result<Vec<Step>, WarplineError> {
        let sessions = self.sessions.lock().expect("session store lock");
        let mut steps: Vec<Step> = sessions
            .get(session_id)
            .map(|state| {
                state
                    .steps
                    .iter()
                    .filter(|step| matches(step, query))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        steps.sort_by_key(|step| step.sequence);
        if let Some(limit) = query.limit {
            steps.truncate(limit);
        }
        Ok(steps)
    }

    async fn get_last_step(&self, session_id: &str) -> Result<Option<Step>, WarplineError> {
        let sessions = self.sessions.lock().expect("session store lock");
        Ok(sessions.get(session_id).and_then(|state| {
            state
                .steps
                .iter()
                .max_by_key(|step| step.sequence)
                .cloned()
        }))
    }

    async fn delete_steps(&self, session_id: &str, start_seq: u64) -> Result<u64, WarplineError> {
        let mut sessions = self.sessions.lock().expect("session store lock");
        let Some(state) = sessions.get_mut(session_id) else {
            return Ok(0);
        };
        let before = state.steps.len();
        state.steps.retain(|step| step.sequence < start_seq);
        // Pull the counter back so a retry continues from the new tail.
        let tail = state
            .steps
            .iter()
            .map(|step| step.sequence)
            .max()
            .unwrap_or(0);
        state.counter = state.counter.min(tail);
        Ok((before - state.steps.len()) as u64)
    }

    async fn allocate_sequence(&self, session_id: &str) -> Result<u64, WarplineError> {
        let mut sessions = self.sessions.lock().expect("session store lock");
        let state = sessions.entry(session_id.to_string()).or_default();
        // Forked sessions arrive with pre-existing sequences and a zero
        // counter; allocation always continues past the log's tail.
        let tail = state
            .steps
            .iter()
            .map(|step| step.sequence)
            .max()
            .unwrap_or(0);
        state.counter = state.counter.max(tail) + 1;
        Ok(state.counter)
    }

    async fn save_run(&self, run: &Run) -> Result<(), WarplineError> {
        let mut runs = self.runs.lock().expect("run store lock");
        if let Some(existing) = runs.iter_mut().find(|candidate| candidate.id == run.id) {
            *existing = run.clone();
        } else {
            runs.push(run.clone());
        }
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<Run>, WarplineError> {
        let runs = self.runs.lock().expect("run store lock");
        Ok(runs.iter().find(|run| run.id == run_id).cloned())
    }

    async fn list_runs(&self, query: &RunQuery) -> Result<Vec<Run>, WarplineError> {
        let runs = self.runs.lock().expect("run store lock");
        Ok(runs
            .iter()
            .filter(|run| match &query.user_id {
                Some(user_id) => run.user_id.as_ref() == Some(user_id),
                None => true,
            })
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect())
    }
}
