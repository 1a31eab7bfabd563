//! OpenAI Chat Completions adapter.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::ValetError;
use crate::types::{
    ContentPart, FinishReason, ModelMessage, Role, StreamChunk, ToolCall, ToolChoice, Usage,
};

use super::http::{bearer_headers, shared_client, sse_data_stream, status_to_error};
use super::{ChatRequest, ChatResponse, ModelProvider};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    model_id: String,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(model_id: String, api_key: String, base_url: Option<String>) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model_id,
            api_key,
        }
    }

    fn build_request_body(&self, request: &ChatRequest, stream: bool) -> Value {
        let mut body = Map::new();
        body.insert("model".into(), self.model_id.clone().into());
        body.insert(
            "messages".into(),
            request.messages.iter().map(message_to_wire).collect(),
        );
        body.insert("stream".into(), stream.into());

        let settings = &request.settings;
        if let Some(max) = settings.max_tokens {
            body.insert("max_tokens".into(), max.into());
        }
        if let Some(temperature) = settings.temperature {
            body.insert("temperature".into(), temperature.into());
        }
        if let Some(top_p) = settings.top_p {
            body.insert("top_p".into(), top_p.into());
        }
        if let Some(ref stops) = settings.stop_sequences {
            body.insert("stop".into(), json!(stops));
        }
        if let Some(parallel) = settings.parallel_tool_calls {
            body.insert("parallel_tool_calls".into(), parallel.into());
        }
        match settings.tool_choice {
            Some(ToolChoice::Required) => {
                body.insert("tool_choice".into(), "required".into());
            }
            Some(ToolChoice::None) => {
                body.insert("tool_choice".into(), "none".into());
            }
            Some(ToolChoice::Auto) | None => {}
        }

        if let Some(tools) = request.tools.as_deref().filter(|t| !t.is_empty()) {
            let defs: Vec<Value> = tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        }
                    })
                })
                .collect();
            body.insert("tools".into(), defs.into());
        }

        Value::Object(body)
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, ValetError> {
        let response = shared_client()
            .post(format!("{}/chat/completions", self.base_url))
            .headers(bearer_headers(&self.api_key))
            .json(body)
            .send()
            .await?;

        let status = response.status().as_u16();
        if status != 200 {
            let detail = response.text().await.unwrap_or_default();
            return Err(status_to_error(status, &detail));
        }
        Ok(response)
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    fn provider_name(&self) -> &str {
        "openai"
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ValetError> {
        debug!(model = %self.model_id, "OpenAI chat");

        let body = self.build_request_body(request, false);
        let data: WireChatResponse = self.post(&body).await?.json().await?;

        let choice = data
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ValetError::api(200, "empty choices in OpenAI response"))?;

        let tool_calls: Vec<ToolCall> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| ToolCall {
                id: call.id,
                name: call.function.name,
                // Unparseable argument strings are kept raw rather than lost.
                arguments: serde_json::from_str(&call.function.arguments)
                    .unwrap_or(Value::String(call.function.arguments)),
            })
            .collect();

        Ok(ChatResponse {
            finish_reason: normalize_finish_reason(
                choice.finish_reason.as_deref(),
                !tool_calls.is_empty(),
            ),
            text: choice.message.content.unwrap_or_default(),
            tool_calls,
            usage: data.usage.map(WireUsage::into_usage).unwrap_or_default(),
        })
    }

    async fn stream(
        &self,
        request: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamChunk, ValetError>>, ValetError> {
        debug!(model = %self.model_id, "OpenAI stream");

        let body = self.build_request_body(request, true);
        let response = self.post(&body).await?;
        let payloads = sse_data_stream(response.bytes_stream());

        let stream = async_stream::stream! {
            let mut state = StreamState::default();
            futures::pin_mut!(payloads);

            while let Some(payload) = payloads.next().await {
                let payload = match payload {
                    Ok(p) => p,
                    Err(err) => {
                        yield Err(err);
                        break;
                    }
                };
                let Ok(wire) = serde_json::from_str::<WireStreamChunk>(&payload) else {
                    continue;
                };
                for chunk in state.ingest(wire) {
                    yield Ok(chunk);
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

/// Streaming bookkeeping: tool-call deltas are keyed by index, and the
/// call id only arrives on the first fragment for that index.
#[derive(Default)]
struct StreamState {
    call_ids: HashMap<u32, String>,
    saw_tool_calls: bool,
}

impl StreamState {
    fn ingest(&mut self, wire: WireStreamChunk) -> Vec<StreamChunk> {
        let mut out = Vec::new();
        let usage = wire.usage;
        let Some(choice) = wire.choices.into_iter().next() else {
            return out;
        };

        if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
            out.push(StreamChunk::TextDelta { text });
        }

        for fragment in choice.delta.tool_calls.unwrap_or_default() {
            let function = fragment.function.unwrap_or_default();
            if let (Some(id), Some(name)) = (fragment.id, function.name) {
                self.call_ids.insert(fragment.index, id.clone());
                self.saw_tool_calls = true;
                out.push(StreamChunk::ToolCallStart { id, name });
            }
            if let Some(arguments) = function.arguments.filter(|a| !a.is_empty()) {
                if let Some(id) = self.call_ids.get(&fragment.index) {
                    out.push(StreamChunk::ToolCallDelta {
                        id: id.clone(),
                        arguments,
                    });
                }
            }
        }

        if let Some(reason) = choice.finish_reason.as_deref() {
            out.push(StreamChunk::Done {
                finish_reason: normalize_finish_reason(Some(reason), self.saw_tool_calls),
                usage: usage.map(WireUsage::into_usage),
            });
        }
        out
    }
}

fn normalize_finish_reason(reason: Option<&str>, saw_tool_calls: bool) -> FinishReason {
    match reason {
        Some("tool_calls") | Some("function_call") => FinishReason::ToolCalls,
        Some("length") => FinishReason::Length,
        Some("content_filter") => FinishReason::Error,
        // "stop" after tool calls still means the model wants them run.
        _ if saw_tool_calls => FinishReason::ToolCalls,
        _ => FinishReason::Stop,
    }
}

fn message_to_wire(msg: &ModelMessage) -> Value {
    if let [ContentPart::ToolOutput(out)] = msg.content.as_slice() {
        return json!({
            "role": "tool",
            "tool_call_id": out.call_id,
            "content": out.result.to_string(),
        });
    }

    let role = match msg.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };

    let calls = msg.tool_calls();
    if calls.is_empty() {
        return json!({ "role": role, "content": msg.text() });
    }

    let wire_calls: Vec<Value> = calls
        .iter()
        .map(|call| {
            json!({
                "id": call.id,
                "type": "function",
                "function": {
                    "name": call.name,
                    "arguments": call.arguments.to_string(),
                }
            })
        })
        .collect();
    let text = msg.text();
    json!({
        "role": role,
        "content": if text.is_empty() { Value::Null } else { Value::String(text) },
        "tool_calls": wire_calls,
    })
}

#[derive(Deserialize)]
struct WireChatResponse {
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl WireUsage {
    fn into_usage(self) -> Usage {
        Usage {
            input_tokens: self.prompt_tokens,
            output_tokens: self.completion_tokens,
            total_tokens: self.total_tokens,
        }
    }
}

#[derive(Deserialize)]
struct WireStreamChunk {
    choices: Vec<WireStreamChoice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireStreamChoice {
    delta: WireDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireDelta {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCallDelta>>,
}

#[derive(Deserialize)]
struct WireToolCallDelta {
    index: u32,
    id: Option<String>,
    function: Option<WireFunctionDelta>,
}

#[derive(Deserialize, Default)]
struct WireFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ToolDefinition;
    use crate::types::GenerationSettings;

    fn provider() -> OpenAiProvider {
        OpenAiProvider::new("gpt-4o".to_string(), "test-key".to_string(), None)
    }

    #[test]
    fn request_body_includes_tool_controls() {
        let request = ChatRequest {
            messages: vec![ModelMessage::user("hello")],
            settings: GenerationSettings {
                parallel_tool_calls: Some(false),
                tool_choice: Some(ToolChoice::Required),
                ..Default::default()
            },
            tools: Some(vec![ToolDefinition {
                name: "get_event".to_string(),
                description: "Look up events".to_string(),
                parameters: json!({"type": "object", "properties": {}}),
            }]),
        };
        let body = provider().build_request_body(&request, false);
        assert_eq!(body["parallel_tool_calls"], false);
        assert_eq!(body["tool_choice"], "required");
        assert_eq!(body["tools"][0]["function"]["name"], "get_event");
    }

    #[test]
    fn tool_output_message_serializes_as_tool_role() {
        let msg = ModelMessage::tool_output("call-1", json!({"ok": true}), false);
        let wire = message_to_wire(&msg);
        assert_eq!(wire["role"], "tool");
        assert_eq!(wire["tool_call_id"], "call-1");
    }

    #[test]
    fn stream_state_joins_fragments_by_index() {
        let mut state = StreamState::default();

        let opened: WireStreamChunk = serde_json::from_str(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"get_event","arguments":""}}]},"finish_reason":null}]}"#,
        )
        .unwrap();
        let fragment: WireStreamChunk = serde_json::from_str(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{}"}}]},"finish_reason":null}]}"#,
        )
        .unwrap();

        let first = state.ingest(opened);
        assert_eq!(
            first,
            vec![StreamChunk::ToolCallStart {
                id: "call_1".to_string(),
                name: "get_event".to_string()
            }]
        );
        let second = state.ingest(fragment);
        assert_eq!(
            second,
            vec![StreamChunk::ToolCallDelta {
                id: "call_1".to_string(),
                arguments: "{}".to_string()
            }]
        );
    }

    #[test]
    fn finish_reason_normalization() {
        assert_eq!(normalize_finish_reason(Some("stop"), false), FinishReason::Stop);
        assert_eq!(
            normalize_finish_reason(Some("stop"), true),
            FinishReason::ToolCalls
        );
        assert_eq!(
            normalize_finish_reason(Some("length"), false),
            FinishReason::Length
        );
        assert_eq!(
            normalize_finish_reason(Some("content_filter"), false),
            FinishReason::Error
        );
    }
}
