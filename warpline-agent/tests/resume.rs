mod common;

use std::sync::Arc;

use common::{text_turn, EchoTool, ScriptedModel};
use futures::StreamExt;
use warpline_agent::{Agent, ResumeExecutor};
use warpline_core::{
    Role, RunnableRegistry, SessionStore, Step, StepEventType, StepQuery, ToolCallData, Wire,
};
use warpline_session::InMemorySessionStore;

async fn seed_interrupted_session(store: &InMemorySessionStore, session_id: &str) {
    // A user turn and an assistant turn whose tool call never ran.
    let mut user = Step::user(session_id, "old-run", 1, "please echo 'hi'");
    user.runnable_id = Some("echo-agent".to_string());
    store.save_step(&user).await.unwrap();

    let mut assistant = Step::assistant(session_id, "old-run", 2);
    assistant.content = Some("Let me echo that.".to_string());
    assistant.tool_calls = Some(vec![ToolCallData::function_call(
        "call_1",
        "echo",
        r#"{"text":"hi"}"#,
    )]);
    assistant.runnable_id = Some("echo-agent".to_string());
    store.save_step(&assistant).await.unwrap();
}

fn registry_with_agent(store: Arc<InMemorySessionStore>, model: Arc<ScriptedModel>) -> Arc<RunnableRegistry> {
    let agent = Arc::new(
        Agent::builder("echo-agent")
            .model(model)
            .tool(Arc::new(EchoTool))
            .store(store)
            .build()
            .unwrap(),
    );
    let registry = Arc::new(RunnableRegistry::new());
    registry.register(agent);
    registry
}

#[tokio::test]
async fn resume_executes_pending_tool_first() {
    let store = Arc::new(InMemorySessionStore::new());
    seed_interrupted_session(&store, "s1").await;
    let model = ScriptedModel::new(vec![text_turn("All done: hi")]);
    let registry = registry_with_agent(Arc::clone(&store), Arc::clone(&model));

    let executor = ResumeExecutor::new(Arc::clone(&store) as Arc<dyn SessionStore>, registry);
    let wire = Wire::new();
    let reader = wire.read();
    let result = executor.resume_session("s1", None, wire.clone()).await;
    wire.close().await;
    let events: Vec<_> = reader.collect().await;

    let output = result.unwrap();
    assert_eq!(output.response.as_deref(), Some("All done: hi"));

    // The pending tool ran before any new model turn, at sequence last+1.
    let steps = store.get_steps("s1", &StepQuery::default()).await.unwrap();
    let tool_step = steps.iter().find(|s| s.is_tool()).expect("tool step");
    assert_eq!(tool_step.sequence, 3);
    assert_eq!(tool_step.tool_call_id.as_deref(), Some("call_1"));
    assert_eq!(tool_step.content.as_deref(), Some("Echo: hi"));

    let final_assistant = steps.last().unwrap();
    assert_eq!(final_assistant.role, Role::Assistant);
    assert_eq!(final_assistant.sequence, 4);

    assert!(events
        .iter()
        .any(|e| e.event_type == StepEventType::RunCompleted));
    // No fresh user step was created by the resume.
    let user_steps = steps.iter().filter(|s| s.role == Role::User).count();
    assert_eq!(user_steps, 1);
}

#[tokio::test]
async fn completed_session_returns_without_reexecution() {
    let store = Arc::new(InMemorySessionStore::new());
    let mut user = Step::user("s2", "r", 1, "question");
    user.runnable_id = Some("echo-agent".to_string());
    store.save_step(&user).await.unwrap();
    let mut assistant = Step::assistant("s2", "r", 2);
    assistant.content = Some("final answer".to_string());
    assistant.runnable_id = Some("echo-agent".to_string());
    store.save_step(&assistant).await.unwrap();

    let model = ScriptedModel::new(vec![]);
    let registry = registry_with_agent(Arc::clone(&store), Arc::clone(&model));
    let executor = ResumeExecutor::new(Arc::clone(&store) as Arc<dyn SessionStore>, registry);

    let output = executor
        .resume_session("s2", None, Wire::new())
        .await
        .unwrap();
    assert_eq!(output.response.as_deref(), Some("final answer"));
    assert_eq!(model.call_count(), 0, "nothing re-executed");
}

#[tokio::test]
async fn resume_of_unknown_session_fails() {
    let store = Arc::new(InMemorySessionStore::new());
    let registry = Arc::new(RunnableRegistry::new());
    let executor = ResumeExecutor::new(store as Arc<dyn SessionStore>, registry);
    let err = executor
        .resume_session("missing", None, Wire::new())
        .await
        .unwrap_err();
    assert!(matches!(err, warpline_core::WarplineError::NotFound(_)));
}

#[tokio::test]
async fn retry_truncates_then_resumes() {
    let store = Arc::new(InMemorySessionStore::new());
    seed_interrupted_session(&store, "s3").await;
    // Add a bad tool step we want to retry away.
    let bad = Step::tool_result("s3", "old-run", 3, "call_1", "echo", "Error: flaky");
    store.save_step(&bad).await.unwrap();

    let model = ScriptedModel::new(vec![text_turn("Recovered: hi")]);
    let registry = registry_with_agent(Arc::clone(&store), Arc::clone(&model));
    let executor = ResumeExecutor::new(Arc::clone(&store) as Arc<dyn SessionStore>, registry);

    let output = executor
        .retry_from_sequence("s3", 3, None, Wire::new())
        .await
        .unwrap();
    assert_eq!(output.response.as_deref(), Some("Recovered: hi"));

    // The bad tool step is gone; the retry re-ran the tool at sequence 3.
    let steps = store.get_steps("s3", &StepQuery::default()).await.unwrap();
    let tool_step = steps.iter().find(|s| s.is_tool()).unwrap();
    assert_eq!(tool_step.sequence, 3);
    assert_eq!(tool_step.content.as_deref(), Some("Echo: hi"));
}
