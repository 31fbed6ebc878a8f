mod common;

use std::sync::Arc;

use common::{run_collect, scripted_agent};
use warpline_core::{SessionStore, StepEventType, StepQuery};
use warpline_session::InMemorySessionStore;
use warpline_workflow::{LoopWorkflow, WorkflowNode};

#[tokio::test]
async fn false_condition_runs_exactly_one_iteration() {
    let store = Arc::new(InMemorySessionStore::new());
    let agent = scripted_agent("worker", vec!["draft one"], store.clone());
    let workflow = Arc::new(
        LoopWorkflow::new(
            "refine",
            vec![WorkflowNode::new("draft", agent, "{input}")],
            "false",
            3,
        )
        .unwrap()
        .with_store(store.clone()),
    );

    let (result, events) = run_collect(workflow, "topic", "s1", store).await;
    assert_eq!(result.unwrap().response.as_deref(), Some("draft one"));

    let iterations: Vec<_> = events
        .iter()
        .filter(|e| e.event_type == StepEventType::IterationStarted)
        .collect();
    assert_eq!(iterations.len(), 1);
    assert_eq!(iterations[0].iteration, Some(1));
}

#[tokio::test]
async fn true_condition_runs_until_cap() {
    let store = Arc::new(InMemorySessionStore::new());
    let agent = scripted_agent("worker", vec!["draft one", "draft two"], store.clone());
    let workflow = Arc::new(
        LoopWorkflow::new(
            "refine",
            vec![WorkflowNode::new("draft", agent, "{input}")],
            "true",
            2,
        )
        .unwrap()
        .with_store(store.clone()),
    );

    let (result, events) = run_collect(workflow, "topic", "s1", store.clone()).await;
    assert_eq!(result.unwrap().response.as_deref(), Some("draft two"));

    let iterations = events
        .iter()
        .filter(|e| e.event_type == StepEventType::IterationStarted)
        .count();
    assert_eq!(iterations, 2);

    // Every Step created inside an iteration carries its number.
    let steps = store.get_steps("s1", &StepQuery::default()).await.unwrap();
    assert!(!steps.is_empty());
    assert!(steps.iter().all(|s| s.iteration.is_some()));
    assert!(steps.iter().any(|s| s.iteration == Some(1)));
    assert!(steps.iter().any(|s| s.iteration == Some(2)));
}

#[tokio::test]
async fn previous_iteration_outputs_are_visible_via_loop_last() {
    let store = Arc::new(InMemorySessionStore::new());
    let agent = scripted_agent("worker", vec!["first pass", "second pass"], store.clone());
    let workflow = Arc::new(
        LoopWorkflow::new(
            "refine",
            vec![WorkflowNode::new(
                "draft",
                agent,
                "improve: {loop.last.draft} (iteration {loop.iteration})",
            )],
            "true",
            2,
        )
        .unwrap()
        .with_store(store.clone()),
    );

    run_collect(workflow, "topic", "s1", store.clone()).await.0.unwrap();

    let steps = store.get_steps("s1", &StepQuery::default()).await.unwrap();
    let second_user = steps
        .iter()
        .filter(|s| s.role == warpline_core::Role::User)
        .find(|s| s.iteration == Some(2))
        .unwrap();
    assert_eq!(
        second_user.content.as_deref(),
        Some("improve: first pass (iteration 2)")
    );
    // First iteration rendered an empty loop.last.
    let first_user = steps
        .iter()
        .filter(|s| s.role == warpline_core::Role::User)
        .find(|s| s.iteration == Some(1))
        .unwrap();
    assert_eq!(first_user.content.as_deref(), Some("improve:  (iteration 1)"));
}

#[tokio::test]
async fn exit_condition_on_node_output() {
    let store = Arc::new(InMemorySessionStore::new());
    // Keeps iterating while the draft says CONTINUE.
    let agent = scripted_agent(
        "worker",
        vec!["CONTINUE working", "CONTINUE again", "FINISHED"],
        store.clone(),
    );
    let workflow = Arc::new(
        LoopWorkflow::new(
            "until-done",
            vec![WorkflowNode::new("draft", agent, "{input}")],
            "{draft} contains 'CONTINUE'",
            10,
        )
        .unwrap()
        .with_store(store.clone()),
    );

    let (result, events) = run_collect(workflow, "go", "s1", store).await;
    assert_eq!(result.unwrap().response.as_deref(), Some("FINISHED"));
    let iterations = events
        .iter()
        .filter(|e| e.event_type == StepEventType::IterationStarted)
        .count();
    assert_eq!(iterations, 3);
}
