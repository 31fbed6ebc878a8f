//! Step-log surgery: fork a session at a sequence point, or truncate it.

use tracing::info;
use uuid::Uuid;

use warpline_core::{SessionStore, StepQuery, WarplineError};

/// Copy Steps with `sequence <= sequence` into a fresh session, preserving
/// sequence numbers. The new session continues independently; the original
/// is untouched.
pub async fn fork_session(
    store: &dyn SessionStore,
    session_id: &str,
    sequence: u64,
) -> Result<String, WarplineError> {
    let query = StepQuery {
        end_seq: Some(sequence),
        ..StepQuery::default()
    };
    let steps = store.get_steps(session_id, &query).await?;
    if steps.is_empty() {
        return Err(WarplineError::NotFound(format!(
            "no steps in session '{session_id}' up to sequence {sequence}"
        )));
    }

    let new_session_id = Uuid::new_v4().to_string();
    let copies: Vec<_> = steps
        .into_iter()
        .map(|mut step| {
            step.session_id = new_session_id.clone();
            step
        })
        .collect();
    store.save_steps_batch(&copies).await?;

    info!(
        from = session_id,
        to = %new_session_id,
        steps = copies.len(),
        "forked session"
    );
    Ok(new_session_id)
}

/// Delete Steps with `sequence >= sequence`; the retry entry point re-runs
/// from whatever the log now ends with.
pub async fn truncate_from(
    store: &dyn SessionStore,
    session_id: &str,
    sequence: u64,
) -> Result<u64, WarplineError> {
    let removed = store.delete_steps(session_id, sequence).await?;
    info!(session_id, sequence, removed, "truncated session");
    Ok(removed)
}
