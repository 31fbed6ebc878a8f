//! Step - the persisted unit of conversation state.
//!
//! A Step is an LLM message with identity and metadata attached. The ordered
//! set of Steps for a `(session_id, run_id)` projects directly to a valid
//! message list; no separate conversation table exists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnableType {
    Agent,
    Workflow,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Raw JSON argument string as emitted by the provider.
    pub arguments: String,
}

/// A finalised tool call on an assistant Step (OpenAI wire shape).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallData {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
}

impl ToolCallData {
    pub fn function_call(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: "function".to_string(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// A streaming fragment of a tool call, merged by `index` during accumulation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallFragment {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub function: FunctionFragment,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionFragment {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StepMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_token_latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_creation_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_exec_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_exec_started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_exec_finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub session_id: String,
    pub run_id: String,
    /// Session-monotonic sequence, starting at 1.
    pub sequence: u64,

    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallData>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub runnable_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runnable_type: Option<RunnableType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    #[serde(default)]
    pub depth: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<StepMetrics>,
    pub created_at: DateTime<Utc>,
}

impl Step {
    pub fn new(role: Role, session_id: impl Into<String>, run_id: impl Into<String>, sequence: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            run_id: run_id.into(),
            sequence,
            role,
            content: None,
            reasoning_content: None,
            tool_calls: None,
            tool_call_id: None,
            name: None,
            runnable_id: None,
            runnable_type: None,
            workflow_id: None,
            node_id: None,
            branch_key: None,
            iteration: None,
            parent_run_id: None,
            parent_span_id: None,
            depth: 0,
            metrics: None,
            created_at: Utc::now(),
        }
    }

    pub fn user(session_id: impl Into<String>, run_id: impl Into<String>, sequence: u64, content: impl Into<String>) -> Self {
        let mut step = Self::new(Role::User, session_id, run_id, sequence);
        step.content = Some(content.into());
        step
    }

    pub fn assistant(session_id: impl Into<String>, run_id: impl Into<String>, sequence: u64) -> Self {
        Self::new(Role::Assistant, session_id, run_id, sequence)
    }

    pub fn tool_result(
        session_id: impl Into<String>,
        run_id: impl Into<String>,
        sequence: u64,
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut step = Self::new(Role::Tool, session_id, run_id, sequence);
        step.tool_call_id = Some(tool_call_id.into());
        step.name = Some(name.into());
        step.content = Some(content.into());
        step
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }

    pub fn is_tool(&self) -> bool {
        self.role == Role::Tool
    }

    pub fn has_tool_calls(&self) -> bool {
        self.is_assistant() && self.tool_calls.as_ref().is_some_and(|calls| !calls.is_empty())
    }
}
