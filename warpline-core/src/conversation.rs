//! Conversation - the mutable message list behind the agent loop.
//!
//! Owns message-list mutation so the loop never hands a raw `Vec` around;
//! projection from Steps stays pure in the adapter.

use crate::{ChatMessage, Role, Step, StepAdapter};

#[derive(Clone, Debug, Default)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new(system_prompt: Option<&str>) -> Self {
        let mut conversation = Self::default();
        if let Some(prompt) = system_prompt {
            conversation.messages.push(ChatMessage::system(prompt));
        }
        conversation
    }

    /// Seed from persisted history (already ordered by sequence).
    pub fn from_steps(system_prompt: Option<&str>, steps: &[Step]) -> Self {
        let mut conversation = Self::new(system_prompt);
        conversation
            .messages
            .extend(StepAdapter::steps_to_messages(steps));
        conversation
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::user(content));
    }

    pub fn push_message(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn append_assistant(&mut self, step: &Step) {
        debug_assert!(step.is_assistant());
        self.messages.push(StepAdapter::to_message(step));
    }

    pub fn append_tool_result(&mut self, step: &Step) {
        debug_assert!(step.is_tool());
        self.messages.push(StepAdapter::to_message(step));
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn to_messages(&self) -> Vec<ChatMessage> {
        self.messages.clone()
    }

    /// Content of the most recent assistant message that has any.
    pub fn last_assistant_content(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == Role::Assistant && message.content.is_some())
            .and_then(|message| message.content.as_deref())
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
