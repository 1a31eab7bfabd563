//! Google Gemini provider wire tests against a mock server.

use futures::StreamExt;
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use valet::error::ErrorCategory;
use valet::provider::google::GoogleProvider;
use valet::provider::{ChatRequest, ModelProvider, ToolDefinition};
use valet::types::{FinishReason, GenerationSettings, ModelMessage, StreamChunk};

fn provider(base_url: String) -> GoogleProvider {
    GoogleProvider::new(
        "gemini-2.5-flash".to_string(),
        "test-key".to_string(),
        Some(base_url),
    )
}

fn chat_request() -> ChatRequest {
    ChatRequest {
        messages: vec![
            ModelMessage::system("You schedule meetings."),
            ModelMessage::user("book lunch"),
        ],
        settings: GenerationSettings::default(),
        tools: Some(vec![ToolDefinition {
            name: "insert_event".to_string(),
            description: "Create an event".to_string(),
            parameters: json!({"type": "object", "properties": {}}),
        }]),
    }
}

#[tokio::test]
async fn chat_synthesizes_distinct_ids_for_function_calls() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/models/gemini-2.5-flash:generateContent"))
        .and(query_param("key", "test-key"))
        .and(body_string_contains("systemInstruction"))
        .and(body_string_contains("functionDeclarations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        {"text": "Booking it."},
                        {"functionCall": {"name": "insert_event", "args": {"summary": "Lunch"}}},
                        {"functionCall": {"name": "insert_event", "args": {"summary": "Dinner"}}}
                    ]
                },
                "finishReason": "STOP"
            }],
            "usageMetadata": {
                "promptTokenCount": 11,
                "candidatesTokenCount": 5,
                "totalTokenCount": 16
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = provider(server.uri())
        .chat(&chat_request())
        .await
        .expect("chat should succeed");

    assert_eq!(response.text, "Booking it.");
    assert_eq!(response.finish_reason, FinishReason::ToolCalls);
    assert_eq!(response.tool_calls.len(), 2);
    assert_eq!(response.tool_calls[0].name, "insert_event");
    assert_eq!(response.tool_calls[0].arguments["summary"], "Lunch");
    // The wire format carries no call ids; the adapter mints one per call.
    assert!(!response.tool_calls[0].id.is_empty());
    assert_ne!(response.tool_calls[0].id, response.tool_calls[1].id);
    assert_eq!(response.usage.total_tokens, 16);
}

#[tokio::test]
async fn stream_delivers_whole_function_calls() {
    let server = MockServer::start().await;

    let sse = concat!(
        "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"Checking\"}]}}]}\n\n",
        "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"functionCall\":{\"name\":\"insert_event\",\"args\":{\"summary\":\"Lunch\"}}}]},\"finishReason\":\"STOP\"}],\"usageMetadata\":{\"candidatesTokenCount\":5}}\n\n",
    );

    Mock::given(method("POST"))
        .and(path("/models/gemini-2.5-flash:streamGenerateContent"))
        .and(query_param("alt", "sse"))
        .and(query_param("key", "test-key"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_raw(sse, "text/event-stream"),
        )
        .mount(&server)
        .await;

    let mut stream = provider(server.uri())
        .stream(&chat_request())
        .await
        .expect("stream should open");

    let mut chunks = Vec::new();
    while let Some(chunk) = stream.next().await {
        chunks.push(chunk.expect("chunk"));
    }

    assert_eq!(
        chunks[0],
        StreamChunk::TextDelta {
            text: "Checking".to_string()
        }
    );
    assert!(matches!(
        &chunks[1],
        StreamChunk::ToolCallStart { name, .. } if name == "insert_event"
    ));
    // Arguments arrive whole, as a single delta.
    match &chunks[2] {
        StreamChunk::ToolCallDelta { arguments, .. } => {
            let parsed: serde_json::Value = serde_json::from_str(arguments).expect("json");
            assert_eq!(parsed["summary"], "Lunch");
        }
        other => panic!("expected ToolCallDelta, got {other:?}"),
    }
    match chunks.last() {
        Some(StreamChunk::Done {
            finish_reason,
            usage,
        }) => {
            assert_eq!(*finish_reason, FinishReason::ToolCalls);
            assert_eq!(usage.as_ref().map(|u| u.output_tokens), Some(5));
        }
        other => panic!("expected Done, got {other:?}"),
    }
}

#[tokio::test]
async fn server_failure_is_retryable() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/models/gemini-2.5-flash:generateContent"))
        .respond_with(ResponseTemplate::new(503).set_body_string("temporarily overloaded"))
        .mount(&server)
        .await;

    let err = provider(server.uri())
        .chat(&chat_request())
        .await
        .expect_err("503 should fail");

    assert_eq!(err.category(), ErrorCategory::Server);
    assert!(err.is_retryable());
}
