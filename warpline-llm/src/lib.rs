//! Streaming LLM contract and provider clients.
//!
//! The runtime core depends only on [`ModelClient`]; concrete providers map
//! their wire formats onto neutral [`ModelChunk`]s with normalised usage.

mod retry;
mod types;

pub mod openai_compatible;
pub mod providers;

#[cfg(feature = "anthropic")]
pub mod anthropic;

use futures::stream::BoxStream;

pub use openai_compatible::{OpenAiCompatibleBuilder, OpenAiCompatibleClient};
pub use retry::{error_for_status, RetryPolicy};
pub use types::{ModelChunk, TokenUsage};

#[cfg(feature = "deepseek")]
pub use providers::deepseek::DeepSeekClient;

#[cfg(feature = "anthropic")]
pub use anthropic::AnthropicClient;

use warpline_core::{ChatMessage, ToolSpec, WarplineError};

/// Abstract streaming LLM.
///
/// `stream` yields incremental chunks; retryable transport failures are
/// handled inside implementations, so a surfaced `Err` is final for the
/// current turn.
pub trait ModelClient: Send + Sync {
    fn model_name(&self) -> &str;

    fn provider(&self) -> &str;

    fn stream(
        &self,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolSpec>>,
    ) -> BoxStream<'_, Result<ModelChunk, WarplineError>>;
}
