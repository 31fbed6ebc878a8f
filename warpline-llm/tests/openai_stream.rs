use futures::StreamExt;
use httpmock::prelude::*;
use warpline_core::ChatMessage;
use warpline_llm::{ModelClient, OpenAiCompatibleClient, RetryPolicy};

fn client_for(server: &MockServer) -> OpenAiCompatibleClient {
    OpenAiCompatibleClient::builder()
        .base_url(&server.base_url())
        .unwrap()
        .api_key("test-key")
        .model("test-model")
        .retry(RetryPolicy::none())
        .build()
        .unwrap()
}

#[tokio::test]
async fn streams_content_tool_calls_and_usage() {
    let server = MockServer::start();
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"type\":\"function\",\"function\":{\"name\":\"echo\",\"arguments\":\"{\\\"te\"}}]}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"xt\\\":1}\"}}]}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n",
        "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":12,\"completion_tokens\":7,\"total_tokens\":19}}\n\n",
        "data: [DONE]\n\n",
    );
    let mock = server.mock(|when, then| {
        when.method(POST).path("/v1/chat/completions");
        then.status(200)
            .header("content-type", "text/event-stream")
            .body(body);
    });

    let client = client_for(&server);
    let chunks: Vec<_> = client
        .stream(vec![ChatMessage::user("hi")], None)
        .collect()
        .await;
    mock.assert();

    let chunks: Vec<_> = chunks.into_iter().map(|c| c.unwrap()).collect();
    let text: String = chunks
        .iter()
        .filter_map(|c| c.content.as_deref())
        .collect();
    assert_eq!(text, "Hello");

    let fragments: Vec<_> = chunks
        .iter()
        .filter_map(|c| c.tool_calls.as_ref())
        .flatten()
        .collect();
    assert_eq!(fragments.len(), 2);
    assert_eq!(fragments[0].id.as_deref(), Some("call_1"));
    assert_eq!(fragments[1].function.arguments.as_deref(), Some("xt\":1}"));

    let usage = chunks
        .iter()
        .find_map(|c| c.usage.as_ref())
        .expect("usage chunk");
    assert_eq!(usage.total_tokens, 19);
}

#[tokio::test]
async fn non_retryable_status_surfaces_immediately() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path("/v1/chat/completions");
        then.status(400).body("{\"error\":{\"message\":\"bad request\"}}");
    });

    let client = client_for(&server);
    let results: Vec<_> = client
        .stream(vec![ChatMessage::user("hi")], None)
        .collect()
        .await;
    mock.assert_hits(1);

    assert_eq!(results.len(), 1);
    let error = results[0].as_ref().unwrap_err();
    assert!(!error.is_retryable());
}

#[tokio::test]
async fn retryable_status_is_retried_before_surfacing() {
    let server = MockServer::start();
    // First hit fails with 500; mocks match in definition order, so limit it.
    let failing = server.mock(|when, then| {
        when.method(POST).path("/v1/chat/completions");
        then.status(500).body("boom");
    });

    let client = OpenAiCompatibleClient::builder()
        .base_url(&server.base_url())
        .unwrap()
        .model("test-model")
        .retry(RetryPolicy {
            max_attempts: 2,
            base_delay: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(2),
        })
        .build()
        .unwrap();

    let results: Vec<_> = client
        .stream(vec![ChatMessage::user("hi")], None)
        .collect()
        .await;

    // Both attempts hit the failing mock, then the error surfaces.
    failing.assert_hits(2);
    assert!(results[0].is_err());
}
