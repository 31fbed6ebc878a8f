//! Projection between persisted Steps and provider-neutral chat messages.

use serde::{Deserialize, Serialize};

use crate::{Role, Step, ToolCallData};

/// Provider-neutral LLM message. Providers map this onto their own wire
/// formats; the core never sees provider shapes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
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
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            reasoning_content: None,
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }
}

/// Identity fields required to lift a message back into a Step.
#[derive(Clone, Debug)]
pub struct StepIdentity {
    pub session_id: String,
    pub run_id: String,
    pub sequence: u64,
}

pub struct StepAdapter;

impl StepAdapter {
    /// Project a Step to its LLM message. Metadata does not survive the
    /// projection; identity and metrics live only on the Step.
    pub fn to_message(step: &Step) -> ChatMessage {
        match step.role {
            Role::Tool => ChatMessage {
                role: Role::Tool,
                content: step.content.clone(),
                reasoning_content: None,
                tool_calls: None,
                tool_call_id: step.tool_call_id.clone(),
                name: step.name.clone(),
            },
            _ => ChatMessage {
                role: step.role,
                content: step.content.clone(),
                reasoning_content: step.reasoning_content.clone(),
                tool_calls: step.tool_calls.clone(),
                tool_call_id: None,
                name: None,
            },
        }
    }

    /// Construct a Step from a message plus identity. The inverse of
    /// `to_message` up to id, timestamps and metrics.
    pub fn from_message(message: &ChatMessage, identity: StepIdentity) -> Step {
        let mut step = Step::new(message.role, identity.session_id, identity.run_id, identity.sequence);
        step.content = message.content.clone();
        step.reasoning_content = message.reasoning_content.clone();
        step.tool_calls = message.tool_calls.clone();
        step.tool_call_id = message.tool_call_id.clone();
        step.name = message.name.clone();
        step
    }

    /// Pure map over an already-ordered Step list. Ordering is the caller's
    /// responsibility via its store query.
    pub fn steps_to_messages(steps: &[Step]) -> Vec<ChatMessage> {
        steps.iter().map(Self::to_message).collect()
    }
}
