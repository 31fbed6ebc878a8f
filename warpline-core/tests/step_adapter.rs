use warpline_core::{
    ChatMessage, Role, Step, StepAdapter, StepIdentity, ToolCallData,
};

fn identity(sequence: u64) -> StepIdentity {
    StepIdentity {
        session_id: "s1".to_string(),
        run_id: "r1".to_string(),
        sequence,
    }
}

#[test]
fn user_step_round_trips() {
    let step = Step::user("s1", "r1", 1, "hello");
    let message = StepAdapter::to_message(&step);
    let back = StepAdapter::from_message(&message, identity(1));

    assert_eq!(back.role, Role::User);
    assert_eq!(back.content.as_deref(), Some("hello"));
    assert_eq!(back.sequence, 1);
}

#[test]
fn assistant_step_keeps_tool_calls_and_reasoning() {
    let mut step = Step::assistant("s1", "r1", 2);
    step.content = Some("let me check".to_string());
    step.reasoning_content = Some("the user wants an echo".to_string());
    step.tool_calls = Some(vec![ToolCallData::function_call(
        "call_1",
        "echo",
        r#"{"text":"hi"}"#,
    )]);

    let message = StepAdapter::to_message(&step);
    assert_eq!(message.tool_calls.as_ref().unwrap().len(), 1);
    assert_eq!(message.reasoning_content.as_deref(), Some("the user wants an echo"));

    let back = StepAdapter::from_message(&message, identity(2));
    assert_eq!(back.content, step.content);
    assert_eq!(back.reasoning_content, step.reasoning_content);
    assert_eq!(back.tool_calls, step.tool_calls);
}

#[test]
fn tool_step_projects_call_id_and_name() {
    let step = Step::tool_result("s1", "r1", 3, "call_1", "echo", "Echo: hi");
    let message = StepAdapter::to_message(&step);

    assert_eq!(message.role, Role::Tool);
    assert_eq!(message.tool_call_id.as_deref(), Some("call_1"));
    assert_eq!(message.name.as_deref(), Some("echo"));
    assert_eq!(message.content.as_deref(), Some("Echo: hi"));

    let back = StepAdapter::from_message(&message, identity(3));
    assert_eq!(back.tool_call_id, step.tool_call_id);
    assert_eq!(back.name, step.name);
    assert_eq!(back.content, step.content);
}

#[test]
fn steps_to_messages_is_an_order_preserving_map() {
    let steps = vec![
        Step::user("s1", "r1", 1, "hi"),
        Step::tool_result("s1", "r1", 2, "c", "echo", "Echo: hi"),
    ];
    let messages = StepAdapter::steps_to_messages(&steps);
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[1].role, Role::Tool);
}

#[test]
fn tool_message_serde_skips_absent_fields() {
    let message = ChatMessage::user("hi");
    let json = serde_json::to_string(&message).unwrap();
    assert!(!json.contains("tool_call_id"));
    assert!(!json.contains("reasoning_content"));
}
