use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WarplineError {
    #[error("provider error: {message}")]
    Provider { message: String, retryable: bool },
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("max retries ({max}) exceeded: {last_error}")]
    MaxRetriesExceeded { max: usize, last_error: String },
    #[error("cancelled: {0}")]
    Cancelled(String),
    #[error("invariant violated: {0}")]
    Invariant(String),
    #[error("circular runnable reference: {0}")]
    CircularReference(String),
    #[error("max nesting depth ({max}) exceeded")]
    MaxDepthExceeded { max: u32 },
    #[error("workflow error: {0}")]
    Workflow(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl WarplineError {
    /// Provider failure that should surface immediately.
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
            retryable: false,
        }
    }

    /// Provider failure in the retryable class (connection, timeout, 429, 5xx).
    pub fn provider_retryable(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Provider { retryable: true, .. } | Self::Timeout(_)
        )
    }

    /// Short machine-readable tag used in RUN_FAILED payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Provider { .. } => "provider",
            Self::InvalidConfig(_) => "config",
            Self::Timeout(_) => "timeout",
            Self::MaxRetriesExceeded { .. } => "max_retries",
            Self::Cancelled(_) => "cancelled",
            Self::Invariant(_) => "invariant",
            Self::CircularReference(_) => "circular_reference",
            Self::MaxDepthExceeded { .. } => "max_depth",
            Self::Workflow(_) => "workflow",
            Self::NotFound(_) => "not_found",
            Self::Storage(_) => "storage",
            Self::Serde(_) => "serde",
        }
    }
}
