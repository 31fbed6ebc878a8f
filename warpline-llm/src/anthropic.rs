//! Anthropic messages-protocol client.
//!
//! Converts the neutral message shape into Anthropic's: one top-level system
//! string, tool uses as assistant content blocks, and tool results carried
//! inside a following user message. Invalid tool-call argument strings are
//! wrapped instead of aborting the turn.

use std::time::Duration;

use bytes::BytesMut;
use futures::stream::BoxStream;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::warn;
use url::Url;

use warpline_core::{ChatMessage, Role, ToolCallFragment, ToolSpec, WarplineError};

use crate::retry::{error_for_status, RetryPolicy};
use crate::{ModelChunk, ModelClient, TokenUsage};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Parse a tool-call argument string, falling back to a wrapper object so a
/// malformed model emission degrades instead of failing the whole turn.
pub fn parse_tool_arguments(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| json!({ "__raw_arguments__": raw }))
}

/// Build the Anthropic request body from neutral messages.
pub fn convert_request(
    model: &str,
    messages: &[ChatMessage],
    tools: Option<&[ToolSpec]>,
    max_tokens: u32,
) -> Value {
    let mut system_parts = Vec::new();
    let mut converted: Vec<Value> = Vec::new();

    for message in messages {
        match message.role {
            Role::System => {
                if let Some(content) = &message.content {
                    system_parts.push(content.clone());
                }
            }
            Role::User => {
                converted.push(json!({
                    "role": "user",
                    "content": message.content.clone().unwrap_or_default(),
                }));
            }
            Role::Assistant => {
                let mut blocks = Vec::new();
                if let Some(content) = &message.content {
                    if !content.is_empty() {
                        blocks.push(json!({ "type": "text", "text": content }));
                    }
                }
                for call in message.tool_calls.iter().flatten() {
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.function.name,
                        "input": parse_tool_arguments(&call.function.arguments),
                    }));
                }
                converted.push(json!({ "role": "assistant", "content": blocks }));
            }
            Role::Tool => {
                let block = json!({
                    "type": "tool_result",
                    "tool_use_id": message.tool_call_id.clone().unwrap_or_default(),
                    "content": message.content.clone().unwrap_or_default(),
                });
                // Consecutive tool results share one user message.
                let merged = converted
                    .last_mut()
                    .filter(|last| {
                        last["role"] == "user"
                            && last["content"]
                                .as_array()
                                .is_some_and(|blocks| blocks.iter().all(|b| b["type"] == "tool_result"))
                    })
                    .and_then(|last| last["content"].as_array_mut())
                    .map(|blocks| blocks.push(block.clone()))
                    .is_some();
                if !merged {
                    converted.push(json!({ "role": "user", "content": [block] }));
                }
            }
        }
    }

    let mut body = json!({
        "model": model,
        "messages": converted,
        "max_tokens": max_tokens,
        "stream": true,
    });
    if !system_parts.is_empty() {
        body["system"] = Value::String(system_parts.join("\n\n"));
    }
    if let Some(tools) = tools {
        body["tools"] = Value::Array(
            tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "input_schema": tool.parameters,
                    })
                })
                .collect(),
        );
    }
    body
}

#[derive(Default)]
struct StreamState {
    input_tokens: u64,
    output_tokens: u64,
    cached_tokens: Option<u64>,
    cache_creation_tokens: Option<u64>,
    stop_reason: Option<String>,
}

impl StreamState {
    fn usage(&self) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            total_tokens: self.input_tokens + self.output_tokens,
            cached_tokens: self.cached_tokens,
            cache_creation_tokens: self.cache_creation_tokens,
        }
    }
}

fn event_to_chunks(payload: &Value, state: &mut StreamState) -> (Vec<ModelChunk>, bool) {
    let mut chunks = Vec::new();
    match payload["type"].as_str().unwrap_or_default() {
        "message_start" => {
            let usage = &payload["message"]["usage"];
            state.input_tokens = usage["input_tokens"].as_u64().unwrap_or(0);
            state.cached_tokens = usage["cache_read_input_tokens"].as_u64();
            state.cache_creation_tokens = usage["cache_creation_input_tokens"].as_u64();
        }
        "content_block_start" => {
            let index = payload["index"].as_u64().unwrap_or(0) as usize;
            let block = &payload["content_block"];
            if block["type"] == "tool_use" {
                chunks.push(ModelChunk::tool_calls(vec![ToolCallFragment {
                    index,
                    id: block["id"].as_str().map(str::to_string),
                    kind: Some("function".to_string()),
                    function: warpline_core::FunctionFragment {
                        name: block["name"].as_str().map(str::to_string),
                        arguments: None,
                    },
                }]));
            }
        }
        "content_block_delta" => {
            let index = payload["index"].as_u64().unwrap_or(0) as usize;
            let delta = &payload["delta"];
            match delta["type"].as_str().unwrap_or_default() {
                "text_delta" => {
                    if let Some(text) = delta["text"].as_str() {
                        chunks.push(ModelChunk::content(text));
                    }
                }
                "thinking_delta" => {
                    if let Some(text) = delta["thinking"].as_str() {
                        chunks.push(ModelChunk::reasoning(text));
                    }
                }
                "input_json_delta" => {
                    if let Some(partial) = delta["partial_json"].as_str() {
                        chunks.push(ModelChunk::tool_calls(vec![ToolCallFragment {
                            index,
                            id: None,
                            kind: None,
                            function: warpline_core::FunctionFragment {
                                name: None,
                                arguments: Some(partial.to_string()),
                            },
                        }]));
                    }
                }
                _ => {}
            }
        }
        "message_delta" => {
            if let Some(tokens) = payload["usage"]["output_tokens"].as_u64() {
                state.output_tokens = tokens;
            }
            if let Some(reason) = payload["delta"]["stop_reason"].as_str() {
                state.stop_reason = Some(reason.to_string());
            }
        }
        "message_stop" => {
            let mut final_chunk = ModelChunk::usage(state.usage());
            final_chunk.finish_reason = state.stop_reason.clone();
            chunks.push(final_chunk);
            return (chunks, true);
        }
        // ping, content_block_stop and unknown event types carry nothing.
        _ => {}
    }
    (chunks, false)
}

fn parse_sse_buffer(
    buffer: &mut BytesMut,
    state: &mut StreamState,
) -> Result<(Vec<ModelChunk>, bool), WarplineError> {
    let mut chunks = Vec::new();
    loop {
        let Some(newline) = buffer.iter().position(|byte| *byte == b'\n') else {
            return Ok((chunks, false));
        };
        let line = buffer.split_to(newline + 1);
        let line = std::str::from_utf8(&line)
            .map_err(|err| WarplineError::provider(format!("invalid utf-8 in stream: {err}")))?
            .trim();
        let Some(payload) = line.strip_prefix("data:").map(str::trim) else {
            continue;
        };
        let payload: Value = serde_json::from_str(payload)
            .map_err(|err| WarplineError::provider(format!("malformed event: {err}")))?;
        if payload["type"] == "error" {
            let message = payload["error"]["message"]
                .as_str()
                .unwrap_or("unknown stream error");
            return Err(WarplineError::provider(message));
        }
        let (mut new_chunks, done) = event_to_chunks(&payload, state);
        chunks.append(&mut new_chunks);
        if done {
            return Ok((chunks, true));
        }
    }
}

pub struct AnthropicClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: SecretString,
    model: String,
    max_tokens: u32,
    retry: RetryPolicy,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, WarplineError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|err| WarplineError::provider(err.to_string()))?;
        Ok(Self {
            http,
            base_url: Url::parse("https://api.anthropic.com")
                .map_err(|err| WarplineError::InvalidConfig(err.to_string()))?,
            api_key: SecretString::new(api_key.into()),
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 4096,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, WarplineError> {
        self.base_url =
            Url::parse(base_url).map_err(|err| WarplineError::InvalidConfig(err.to_string()))?;
        Ok(self)
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn open_stream(&self, body: &Value) -> Result<reqwest::Response, WarplineError> {
        let url = self
            .base_url
            .join("v1/messages")
            .map_err(|err| WarplineError::InvalidConfig(err.to_string()))?;
        let response = self
            .http
            .post(url)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|err| WarplineError::provider_retryable(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_for_status(status.as_u16(), &body));
        }
        Ok(response)
    }
}

impl ModelClient for AnthropicClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> &str {
        "anthropic"
    }

    fn stream(
        &self,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolSpec>>,
    ) -> BoxStream<'_, Result<ModelChunk, WarplineError>> {
        let body = convert_request(&self.model, &messages, tools.as_deref(), self.max_tokens);
        let retry = self.retry.clone();
        async_stream::stream! {
            let mut response = None;
            let mut attempt = 0usize;
            loop {
                attempt += 1;
                match self.open_stream(&body).await {
                    Ok(opened) => {
                        response = Some(opened);
                        break;
                    }
                    Err(error) if retry.should_retry(&error, attempt) => {
                        let delay = retry.delay_for(attempt);
                        warn!(attempt, ?delay, %error, "retrying anthropic request");
                        tokio::time::sleep(delay).await;
                    }
                    Err(error) => {
                        yield Err(error);
                        return;
                    }
                }
            }
            let response = response.expect("stream opened");

            let mut state = StreamState::default();
            let mut buffer = BytesMut::new();
            let mut bytes = response.bytes_stream();
            while let Some(piece) = bytes.next().await {
                match piece {
                    Ok(data) => {
                        buffer.extend_from_slice(&data);
                        match parse_sse_buffer(&mut buffer, &mut state) {
                            Ok((chunks, done)) => {
                                for chunk in chunks {
                                    yield Ok(chunk);
                                }
                                if done {
                                    return;
                                }
                            }
                            Err(error) => {
                                yield Err(error);
                                return;
                            }
                        }
                    }
                    Err(error) => {
                        yield Err(WarplineError::provider(error.to_string()));
                        return;
                    }
                }
            }
        }
        .boxed()
    }
}
