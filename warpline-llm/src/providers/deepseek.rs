//! DeepSeek client.
//!
//! Speaks the OpenAI-compatible protocol with one twist: reasoning content
//! handling depends on whether the request continues an in-flight turn.

use std::time::Duration;

use futures::stream::BoxStream;
use serde_json::{json, Value};

use warpline_core::{ChatMessage, Role, ToolSpec, WarplineError};

use crate::openai_compatible::{OpenAiCompatibleClient, OpenAiTool, StreamOptions};
use crate::{ModelChunk, ModelClient};

#[derive(Clone)]
pub struct DeepSeekClient {
    inner: OpenAiCompatibleClient,
}

impl DeepSeekClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, WarplineError> {
        let inner = OpenAiCompatibleClient::builder()
            .base_url("https://api.deepseek.com")?
            .api_key(api_key)
            .model("deepseek-reasoner")
            .provider_label("deepseek")
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self { inner })
    }

    pub fn from_client(inner: OpenAiCompatibleClient) -> Self {
        Self { inner }
    }
}

/// Project messages for a reasoning-capable model.
///
/// When the last message is a fresh user turn, prior assistant reasoning is
/// stripped entirely. When the conversation is mid-turn (tool results are
/// being fed back), every assistant message must carry the field, so an
/// explicit `null` is injected where it is missing.
pub fn reasoning_messages(messages: &[ChatMessage]) -> Vec<Value> {
    let fresh_turn = messages
        .last()
        .map(|message| message.role == Role::User)
        .unwrap_or(true);

    messages
        .iter()
        .map(|message| {
            let mut value = serde_json::to_value(message).unwrap_or(Value::Null);
            if message.role == Role::Assistant {
                if let Value::Object(map) = &mut value {
                    if fresh_turn {
                        map.remove("reasoning_content");
                    } else if !map.contains_key("reasoning_content") {
                        map.insert("reasoning_content".to_string(), Value::Null);
                    }
                }
            }
            value
        })
        .collect()
}

impl ModelClient for DeepSeekClient {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn provider(&self) -> &str {
        "deepseek"
    }

    fn stream(
        &self,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolSpec>>,
    ) -> BoxStream<'_, Result<ModelChunk, WarplineError>> {
        let tools: Option<Vec<OpenAiTool>> =
            tools.map(|specs| specs.into_iter().map(OpenAiTool::from).collect());
        let mut body = json!({
            "model": self.inner.model_name(),
            "messages": reasoning_messages(&messages),
            "stream": true,
            "stream_options": StreamOptions { include_usage: true },
        });
        if let Some(tools) = tools {
            body["tools"] = serde_json::to_value(tools).unwrap_or(Value::Null);
        }
        self.inner.stream_body(body)
    }
}
