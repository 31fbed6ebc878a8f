use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;

use warpline::agent::{Agent, RunnableExecutor, RunnableTool};
use warpline::llm::{ModelChunk, ModelClient, TokenUsage};
use warpline::session::InMemorySessionStore;
use warpline::sse;
use warpline::workflow::{PipelineWorkflow, WorkflowNode};
use warpline::{run_streaming, ChatMessage, StepEventType, ToolSpec, WarplineError};

/// Minimal scripted model: replies with fixed text, one reply per call.
struct FixedModel(std::sync::Mutex<Vec<String>>);

impl FixedModel {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self(std::sync::Mutex::new(
            replies.iter().rev().map(|s| s.to_string()).collect(),
        )))
    }
}

impl ModelClient for FixedModel {
    fn model_name(&self) -> &str {
        "fixed"
    }
    fn provider(&self) -> &str {
        "test"
    }
    fn stream(
        &self,
        _messages: Vec<ChatMessage>,
        _tools: Option<Vec<ToolSpec>>,
    ) -> BoxStream<'_, Result<ModelChunk, WarplineError>> {
        let reply = self.0.lock().unwrap().pop().unwrap_or_default();
        futures::stream::iter(vec![
            Ok(ModelChunk::content(reply)),
            Ok(ModelChunk::usage(TokenUsage {
                input_tokens: 4,
                output_tokens: 2,
                total_tokens: 6,
                cached_tokens: None,
                cache_creation_tokens: None,
            })),
        ])
        .boxed()
    }
}

#[tokio::test]
async fn stream_ends_with_exactly_one_terminal_event() {
    let store = Arc::new(InMemorySessionStore::new());
    let agent = Arc::new(
        Agent::builder("answering")
            .model(FixedModel::new(&["the answer"]))
            .store(store.clone())
            .build()
            .unwrap(),
    );

    let run = run_streaming(agent, "question", "s1", Some(store));
    let events: Vec<_> = run.events.collect().await;
    let output = run.handle.await.unwrap().unwrap();

    assert_eq!(output.response.as_deref(), Some("the answer"));
    let terminal: Vec<_> = events
        .iter()
        .filter(|e| {
            matches!(
                e.event_type,
                StepEventType::RunCompleted | StepEventType::RunFailed
            )
        })
        .collect();
    assert_eq!(terminal.len(), 1);
    assert_eq!(terminal[0].event_type, StepEventType::RunCompleted);
    assert!(std::ptr::eq(*terminal.last().unwrap(), events.last().unwrap()));
}

#[tokio::test]
async fn failure_surfaces_as_run_failed_then_stream_ends() {
    struct BrokenModel;
    impl ModelClient for BrokenModel {
        fn model_name(&self) -> &str {
            "broken"
        }
        fn provider(&self) -> &str {
            "test"
        }
        fn stream(
            &self,
            _messages: Vec<ChatMessage>,
            _tools: Option<Vec<ToolSpec>>,
        ) -> BoxStream<'_, Result<ModelChunk, WarplineError>> {
            futures::stream::once(async { Err(WarplineError::provider("out of capacity")) })
                .boxed()
        }
    }

    let agent = Arc::new(
        Agent::builder("failing")
            .model(Arc::new(BrokenModel))
            .build()
            .unwrap(),
    );

    let run = run_streaming(agent, "question", "s1", None);
    let events: Vec<_> = run.events.collect().await;
    assert!(run.handle.await.unwrap().is_err());

    let last = events.last().unwrap();
    assert_eq!(last.event_type, StepEventType::RunFailed);
    let data = last.data.as_ref().unwrap();
    assert!(data["error"].as_str().unwrap().contains("out of capacity"));
    assert_eq!(data["error_type"], "provider");
}

#[tokio::test]
async fn workflow_nested_as_agent_tool_streams_end_to_end() {
    let store = Arc::new(InMemorySessionStore::new());

    // A one-node pipeline wrapped as a tool of the outer agent.
    let summarize = Arc::new(
        Agent::builder("summarizer")
            .model(FixedModel::new(&["summary text"]))
            .store(store.clone())
            .build()
            .unwrap(),
    );
    let pipeline = Arc::new(
        PipelineWorkflow::new(
            "summarize-flow",
            vec![WorkflowNode::new("summarize", summarize, "{input}")],
        )
        .unwrap()
        .with_store(store.clone()),
    );

    struct ToolCallingModel {
        called: std::sync::atomic::AtomicBool,
    }
    impl ModelClient for ToolCallingModel {
        fn model_name(&self) -> &str {
            "caller"
        }
        fn provider(&self) -> &str {
            "test"
        }
        fn stream(
            &self,
            _messages: Vec<ChatMessage>,
            _tools: Option<Vec<ToolSpec>>,
        ) -> BoxStream<'_, Result<ModelChunk, WarplineError>> {
            use warpline::{FunctionFragment, ToolCallFragment};
            let first = !self.called.swap(true, std::sync::atomic::Ordering::SeqCst);
            let chunks = if first {
                vec![Ok(ModelChunk::tool_calls(vec![ToolCallFragment {
                    index: 0,
                    id: Some("c1".to_string()),
                    kind: Some("function".to_string()),
                    function: FunctionFragment {
                        name: Some("summarize-flow".to_string()),
                        arguments: Some(r#"{"query":"summarize this"}"#.to_string()),
                    },
                }]))]
            } else {
                vec![Ok(ModelChunk::content("done via workflow"))]
            };
            futures::stream::iter(chunks).boxed()
        }
    }

    let outer = Arc::new(
        Agent::builder("orchestrating")
            .model(Arc::new(ToolCallingModel {
                called: std::sync::atomic::AtomicBool::new(false),
            }))
            .tool(Arc::new(RunnableTool::new(
                pipeline,
                RunnableExecutor::new(Some(store.clone())),
            )))
            .store(store.clone())
            .build()
            .unwrap(),
    );

    let run = run_streaming(outer, "orchestrate", "s1", Some(store));
    let events: Vec<_> = run.events.collect().await;
    let output = run.handle.await.unwrap().unwrap();
    assert_eq!(output.response.as_deref(), Some("done via workflow"));

    // Three runs started: agent, nested workflow, workflow's child agent.
    let starts: Vec<_> = events
        .iter()
        .filter(|e| e.event_type == StepEventType::RunStarted)
        .collect();
    assert_eq!(starts.len(), 3);
    assert_eq!(starts[0].depth, 0);
    assert_eq!(starts[1].runnable_id.as_deref(), Some("summarize-flow"));
    assert_eq!(starts[1].depth, 1);
    assert_eq!(starts[2].depth, 2);
    // Parent chain is intact.
    assert_eq!(starts[1].parent_run_id.as_ref(), Some(&starts[0].run_id));
    assert_eq!(starts[2].parent_run_id.as_ref(), Some(&starts[1].run_id));

    // One terminal event for the whole stream, at the very end.
    assert_eq!(
        events.last().unwrap().event_type,
        StepEventType::RunCompleted
    );
    assert_eq!(events.last().unwrap().run_id, starts[0].run_id);
}

#[tokio::test]
async fn events_serialize_to_sse_frames() {
    let agent = Arc::new(
        Agent::builder("sse-agent")
            .model(FixedModel::new(&["hello"]))
            .build()
            .unwrap(),
    );
    let run = run_streaming(agent, "hi", "s1", None);
    let frames: Vec<String> = run.events.map(|event| sse::event_frame(&event)).collect().await;
    run.handle.await.unwrap().unwrap();

    assert!(!frames.is_empty());
    for frame in &frames {
        assert!(frame.starts_with("data: {"));
        assert!(frame.ends_with("\n\n"));
    }
    assert!(frames.last().unwrap().contains("\"type\":\"run_completed\""));
    assert!(sse::done_frame().contains("done"));
}
