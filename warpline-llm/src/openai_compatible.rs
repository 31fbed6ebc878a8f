//! Generic OpenAI-compatible streaming chat client.
//!
//! Works against any provider speaking the OpenAI chat-completions SSE
//! protocol (OpenAI, DeepSeek, Together, vLLM, ...). The stream is retried
//! with backoff while establishing the connection; once bytes have flowed,
//! errors surface so partial content is never silently replayed.

use std::time::Duration;

use bytes::BytesMut;
use futures::stream::BoxStream;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use warpline_core::{ChatMessage, ToolCallFragment, ToolSpec, WarplineError};

use crate::retry::{error_for_status, RetryPolicy};
use crate::{ModelChunk, ModelClient, TokenUsage};

#[derive(Serialize, Debug, Clone)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<OpenAiTool>>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Serialize, Debug, Clone)]
pub struct StreamOptions {
    pub include_usage: bool,
}

/// OpenAI "function" tool wrapper around the neutral ToolSpec.
#[derive(Serialize, Debug, Clone)]
pub struct OpenAiTool {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: ToolSpec,
}

impl From<ToolSpec> for OpenAiTool {
    fn from(spec: ToolSpec) -> Self {
        Self {
            kind: "function",
            function: spec,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize, Debug, Clone)]
struct ChunkChoice {
    delta: Delta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallFragment>>,
}

#[derive(Deserialize, Debug, Clone)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
    #[serde(default)]
    prompt_tokens_details: Option<PromptTokensDetails>,
    #[serde(default)]
    cache_creation_input_tokens: Option<u64>,
}

#[derive(Deserialize, Debug, Clone)]
struct PromptTokensDetails {
    #[serde(default)]
    cached_tokens: Option<u64>,
}

impl WireUsage {
    fn normalise(&self) -> TokenUsage {
        TokenUsage {
            input_tokens: self.prompt_tokens,
            output_tokens: self.completion_tokens,
            total_tokens: self.total_tokens,
            cached_tokens: self
                .prompt_tokens_details
                .as_ref()
                .and_then(|details| details.cached_tokens),
            cache_creation_tokens: self.cache_creation_input_tokens,
        }
    }
}

/// Outcome of draining one SSE buffer: parsed chunks plus the DONE marker.
fn parse_sse_buffer(buffer: &mut BytesMut) -> Result<(Vec<ModelChunk>, bool), WarplineError> {
    let mut chunks = Vec::new();
    let mut done = false;

    loop {
        let Some(newline) = buffer.iter().position(|byte| *byte == b'\n') else {
            break;
        };
        let line = buffer.split_to(newline + 1);
        let line = std::str::from_utf8(&line)
            .map_err(|err| WarplineError::provider(format!("invalid utf-8 in stream: {err}")))?
            .trim();

        let Some(payload) = line.strip_prefix("data:").map(str::trim) else {
            continue;
        };
        if payload == "[DONE]" {
            done = true;
            break;
        }
        let chunk: ChatCompletionChunk = serde_json::from_str(payload)
            .map_err(|err| WarplineError::provider(format!("malformed chunk: {err}: {payload}")))?;
        chunks.extend(chunk_to_model_chunks(chunk));
    }

    Ok((chunks, done))
}

fn chunk_to_model_chunks(chunk: ChatCompletionChunk) -> Vec<ModelChunk> {
    let mut out = Vec::new();
    for choice in chunk.choices {
        let model_chunk = ModelChunk {
            content: choice.delta.content,
            reasoning_content: choice.delta.reasoning_content,
            tool_calls: choice.delta.tool_calls,
            usage: None,
            finish_reason: choice.finish_reason,
        };
        if !model_chunk.is_empty() {
            out.push(model_chunk);
        }
    }
    if let Some(usage) = chunk.usage {
        out.push(ModelChunk::usage(usage.normalise()));
    }
    out
}

pub struct OpenAiCompatibleBuilder {
    base_url: Option<Url>,
    api_key: Option<SecretString>,
    model: Option<String>,
    provider_label: String,
    timeout: Duration,
    retry: RetryPolicy,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl OpenAiCompatibleBuilder {
    pub fn base_url(mut self, base_url: &str) -> Result<Self, WarplineError> {
        let url = Url::parse(base_url)
            .map_err(|err| WarplineError::InvalidConfig(format!("base url: {err}")))?;
        self.base_url = Some(url);
        Ok(self)
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::new(api_key.into()));
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn provider_label(mut self, label: impl Into<String>) -> Self {
        self.provider_label = label.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn build(self) -> Result<OpenAiCompatibleClient, WarplineError> {
        let base_url = self
            .base_url
            .ok_or_else(|| WarplineError::InvalidConfig("base url is required".to_string()))?;
        let model = self
            .model
            .ok_or_else(|| WarplineError::InvalidConfig("model is required".to_string()))?;
        let http = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|err| WarplineError::provider(err.to_string()))?;
        Ok(OpenAiCompatibleClient {
            http,
            base_url,
            api_key: self.api_key,
            model,
            provider_label: self.provider_label,
            retry: self.retry,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        })
    }
}

#[derive(Clone)]
pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: Option<SecretString>,
    model: String,
    provider_label: String,
    retry: RetryPolicy,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl OpenAiCompatibleClient {
    pub fn builder() -> OpenAiCompatibleBuilder {
        OpenAiCompatibleBuilder {
            base_url: None,
            api_key: None,
            model: None,
            provider_label: "openai".to_string(),
            timeout: Duration::from_secs(300),
            retry: RetryPolicy::default(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn request_body(
        &self,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolSpec>>,
    ) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            tools: tools.map(|specs| specs.into_iter().map(OpenAiTool::from).collect()),
            stream: true,
            stream_options: Some(StreamOptions {
                include_usage: true,
            }),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    fn completions_url(&self) -> Result<Url, WarplineError> {
        self.base_url
            .join("v1/chat/completions")
            .map_err(|err| WarplineError::InvalidConfig(format!("completions url: {err}")))
    }

    async fn open_stream(&self, body: &serde_json::Value) -> Result<reqwest::Response, WarplineError> {
        let url = self.completions_url()?;
        let mut request = self.http.post(url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }
        let response = request.send().await.map_err(|err| {
            // Connection-level failures are retryable by definition.
            WarplineError::provider_retryable(err.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_for_status(status.as_u16(), &body));
        }
        Ok(response)
    }

    /// Stream a prebuilt request body. Provider adapters (DeepSeek) use this
    /// to send their own message projections through the same transport.
    pub fn stream_body(
        &self,
        body: serde_json::Value,
    ) -> BoxStream<'_, Result<ModelChunk, WarplineError>> {
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
                        warn!(attempt, ?delay, %error, "retrying model request");
                        tokio::time::sleep(delay).await;
                    }
                    Err(error) => {
                        yield Err(error);
                        return;
                    }
                }
            }
            let response = response.expect("stream opened");
            debug!(model = %self.model, "model stream opened");

            let mut buffer = BytesMut::new();
            let mut bytes = response.bytes_stream();
            while let Some(piece) = bytes.next().await {
                match piece {
                    Ok(data) => {
                        buffer.extend_from_slice(&data);
                        match parse_sse_buffer(&mut buffer) {
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

impl ModelClient for OpenAiCompatibleClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> &str {
        &self.provider_label
    }

    fn stream(
        &self,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolSpec>>,
    ) -> BoxStream<'_, Result<ModelChunk, WarplineError>> {
        let body = match serde_json::to_value(self.request_body(messages, tools)) {
            Ok(body) => body,
            Err(err) => {
                let error = WarplineError::Serde(err);
                return futures::stream::once(async move { Err(error) }).boxed();
            }
        };
        self.stream_body(body)
    }
}
