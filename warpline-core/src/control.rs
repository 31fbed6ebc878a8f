//! Cooperative cancellation and deadline helpers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::WarplineError;

/// Single-shot abort flag with a reason, shared by clone.
///
/// Long-running paths check it between awaits; nothing is force-cancelled, so
/// termination-summary paths still get a chance to run after an abort.
#[derive(Clone, Default)]
pub struct AbortSignal {
    token: CancellationToken,
    reason: Arc<Mutex<Option<String>>>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal. Only the first reason is kept.
    pub fn abort(&self, reason: impl Into<String>) {
        {
            let mut slot = self.reason.lock().expect("abort reason lock");
            if slot.is_none() {
                *slot = Some(reason.into());
            }
        }
        self.token.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<String> {
        self.reason.lock().expect("abort reason lock").clone()
    }

    /// Resolves when the signal is raised.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    pub fn as_error(&self) -> WarplineError {
        WarplineError::Cancelled(self.reason().unwrap_or_else(|| "aborted".to_string()))
    }

    /// Error early when already aborted.
    pub fn check(&self) -> Result<(), WarplineError> {
        if self.is_aborted() {
            Err(self.as_error())
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.is_aborted())
            .field("reason", &self.reason())
            .finish()
    }
}

/// Effective timeout for a long-running operation: the smaller of the local
/// limit and the time remaining until the absolute deadline. `None` means no
/// limit at all; a past deadline collapses to zero.
pub fn effective_timeout(local: Option<Duration>, deadline: Option<Instant>) -> Option<Duration> {
    let remaining = deadline.map(|at| at.saturating_duration_since(Instant::now()));
    match (local, remaining) {
        (Some(limit), Some(rest)) => Some(limit.min(rest)),
        (Some(limit), None) => Some(limit),
        (None, Some(rest)) => Some(rest),
        (None, None) => None,
    }
}
