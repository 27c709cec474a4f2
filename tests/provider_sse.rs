//! OpenAI-compatible provider against a mock SSE endpoint.

use chatwire::providers::{
    ChatMessage, ChatRequest, GenerationEvent, OpenAiCompatibleProvider, Provider,
};
use chatwire::tools::effect_specs;
use futures_util::StreamExt;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sse_body(chunks: &[&str]) -> String {
    let mut body = String::new();
    for chunk in chunks {
        body.push_str("data: ");
        body.push_str(chunk);
        body.push_str("\n\n");
    }
    body.push_str("data: [DONE]\n\n");
    body
}

#[tokio::test]
async fn streams_text_and_tool_calls() {
    let server = MockServer::start().await;
    let body = sse_body(&[
        r#"{"choices":[{"delta":{"reasoning_content":"Let me see."}}]}"#,
        r#"{"choices":[{"delta":{"content":"Noted, "}}]}"#,
        r#"{"choices":[{"delta":{"content":"Ålice ✓"}}]}"#,
        r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"remember","arguments":"{\"message\":"}}]}}]}"#,
        r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"tea\"}"}}]}}]}"#,
        r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
    ]);

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(serde_json::json!({
            "model": "test-model",
            "stream": true
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAiCompatibleProvider::new(
        &format!("{}/v1", server.uri()),
        Some("test-key"),
        "test-model",
        0.2,
    )
    .unwrap();
    let messages = [ChatMessage::user("remember I like tea")];
    let tools = effect_specs();
    let events: Vec<GenerationEvent> = provider
        .stream_chat(ChatRequest {
            messages: &messages,
            tools: &tools,
        })
        .await
        .unwrap()
        .map(|event| event.unwrap())
        .collect()
        .await;

    assert_eq!(
        events,
        vec![
            GenerationEvent::ReasoningDelta("Let me see.".into()),
            GenerationEvent::TextDelta("Noted, ".into()),
            GenerationEvent::TextDelta("Ålice ✓".into()),
            GenerationEvent::ToolInputStart {
                id: "call_1".into(),
                name: "remember".into()
            },
            GenerationEvent::ToolInputDelta("{\"message\":".into()),
            GenerationEvent::ToolInputDelta("\"tea\"}".into()),
            GenerationEvent::ToolInputEnd,
            GenerationEvent::ToolCall {
                id: "call_1".into(),
                name: "remember".into(),
                arguments: "{\"message\":\"tea\"}".into()
            },
        ]
    );
}

#[tokio::test]
async fn sends_tool_schemas_in_function_format() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(serde_json::json!({
            "tools": [
                {"type": "function", "function": {"name": "remember"}},
                {"type": "function", "function": {"name": "auto_reply"}},
                {"type": "function", "function": {"name": "reply_after"}}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse_body(&[])))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAiCompatibleProvider::new(&server.uri(), None, "m", 0.7).unwrap();
    let tools = effect_specs();
    let events: Vec<_> = provider
        .stream_chat(ChatRequest {
            messages: &[ChatMessage::user("hi")],
            tools: &tools,
        })
        .await
        .unwrap()
        .collect()
        .await;
    assert!(events.is_empty());
}

#[tokio::test]
async fn http_error_is_reported_before_streaming() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&server)
        .await;

    let provider = OpenAiCompatibleProvider::new(&server.uri(), Some("bad"), "m", 0.7).unwrap();
    let err = match provider
        .stream_chat(ChatRequest {
            messages: &[ChatMessage::user("hi")],
            tools: &[],
        })
        .await
    {
        Ok(_) => panic!("expected an HTTP error"),
        Err(e) => e,
    };
    let text = err.to_string();
    assert!(text.contains("401"));
    assert!(text.contains("invalid api key"));
}

#[tokio::test]
async fn content_filter_yields_abort() {
    let server = MockServer::start().await;
    let body = sse_body(&[
        r#"{"choices":[{"delta":{"content":"Well"}}]}"#,
        r#"{"choices":[{"delta":{},"finish_reason":"content_filter"}]}"#,
    ]);
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let provider = OpenAiCompatibleProvider::new(&server.uri(), None, "m", 0.7).unwrap();
    let events: Vec<_> = provider
        .stream_chat(ChatRequest {
            messages: &[ChatMessage::user("hi")],
            tools: &[],
        })
        .await
        .unwrap()
        .map(|event| event.unwrap())
        .collect()
        .await;
    assert_eq!(
        events,
        vec![
            GenerationEvent::TextDelta("Well".into()),
            GenerationEvent::Abort
        ]
    );
}
