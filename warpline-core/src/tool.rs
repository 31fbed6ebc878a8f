//! Tool contract: a named, schema-described capability the model may call.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{AbortSignal, ExecutionContext};

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Declarative description of a tool, projected to provider-specific shapes
/// (OpenAI function, Anthropic tool use) at model-call time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON-Schema for the arguments. Schemas stay data, not types.
    pub parameters: Value,
}

impl ToolSpec {
    /// Derive the parameter schema from an argument struct.
    pub fn for_args<T: schemars::JsonSchema>(
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let schema = schemars::gen::SchemaGenerator::default().into_root_schema_for::<T>();
        Self {
            name: name.into(),
            description: description.into(),
            parameters: serde_json::to_value(schema)
                .unwrap_or_else(|_| serde_json::json!({ "type": "object" })),
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn schema(&self) -> Value;

    /// Results of cacheable tools are memoised per session and argument set.
    fn cacheable(&self) -> bool {
        false
    }

    fn concurrency_safe(&self) -> bool {
        true
    }

    /// Per-call limit; combined with the context deadline at execution time.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    async fn execute(
        &self,
        args: Value,
        ctx: &ExecutionContext,
        abort: &AbortSignal,
    ) -> Result<Value, ToolError>;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.schema(),
        }
    }
}

/// Outcome of one tool invocation. Failures are carried here, never raised:
/// the agent loop always feeds exactly one tool Step per requested call back
/// into the conversation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_name: String,
    pub tool_call_id: String,
    pub input_args: Value,
    /// Stringified result handed to the LLM.
    pub content: String,
    /// Raw execution output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: f64,
    pub is_success: bool,
}

impl ToolResult {
    pub fn failure(
        tool_name: impl Into<String>,
        tool_call_id: impl Into<String>,
        error: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let error = error.into();
        let finished_at = Utc::now();
        Self {
            tool_name: tool_name.into(),
            tool_call_id: tool_call_id.into(),
            input_args: Value::Null,
            content: format!("Error: {error}"),
            output: None,
            error: Some(error),
            started_at,
            finished_at,
            duration_ms: (finished_at - started_at).num_milliseconds() as f64,
            is_success: false,
        }
    }
}
