//! Anthropic Messages API adapter.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::ValetError;
use crate::types::{ContentPart, FinishReason, Role, StreamChunk, ToolCall, ToolChoice, Usage};

use super::http::{anthropic_headers, shared_client, sse_data_stream, status_to_error};
use super::{ChatRequest, ChatResponse, ModelProvider};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
// The messages API requires max_tokens; used when the caller sets none.
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicProvider {
    model_id: String,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(model_id: String, api_key: String, base_url: Option<String>) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model_id,
            api_key,
        }
    }

    fn build_request_body(&self, request: &ChatRequest, stream: bool) -> Value {
        let (system, messages) = split_messages(&request.messages);

        let mut body = Map::new();
        body.insert("model".into(), self.model_id.clone().into());
        body.insert("messages".into(), messages.into());
        body.insert(
            "max_tokens".into(),
            request.settings.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS).into(),
        );
        body.insert("stream".into(), stream.into());

        if let Some(system) = system {
            body.insert("system".into(), system.into());
        }
        if let Some(temperature) = request.settings.temperature {
            body.insert("temperature".into(), temperature.into());
        }
        if let Some(top_p) = request.settings.top_p {
            body.insert("top_p".into(), top_p.into());
        }
        if let Some(ref stops) = request.settings.stop_sequences {
            body.insert("stop_sequences".into(), json!(stops));
        }
        // No top-level parallel switch here; single-call mode rides on
        // the tool_choice object instead.
        match request.settings.tool_choice {
            Some(ToolChoice::Required) => {
                body.insert("tool_choice".into(), json!({"type": "any"}));
            }
            _ if request.settings.parallel_tool_calls == Some(false) => {
                body.insert(
                    "tool_choice".into(),
                    json!({"type": "auto", "disable_parallel_tool_use": true}),
                );
            }
            _ => {}
        }

        if let Some(tools) = request.tools.as_deref().filter(|t| !t.is_empty()) {
            let defs: Vec<Value> = tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "input_schema": tool.parameters,
                    })
                })
                .collect();
            body.insert("tools".into(), defs.into());
        }

        Value::Object(body)
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, ValetError> {
        let response = shared_client()
            .post(format!("{}/messages", self.base_url))
            .headers(anthropic_headers(&self.api_key, API_VERSION))
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
impl ModelProvider for AnthropicProvider {
    fn provider_name(&self) -> &str {
        "anthropic"
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ValetError> {
        debug!(model = %self.model_id, "Anthropic chat");

        let body = self.build_request_body(request, false);
        let data: WireResponse = self.post(&body).await?.json().await?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for block in data.content {
            match block {
                WireBlock::Text { text: t } => text.push_str(&t),
                WireBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCall {
                        id,
                        name,
                        arguments: input,
                    });
                }
                WireBlock::Other => {}
            }
        }

        Ok(ChatResponse {
            text,
            finish_reason: normalize_stop_reason(data.stop_reason.as_deref()),
            usage: Usage {
                input_tokens: data.usage.input_tokens,
                output_tokens: data.usage.output_tokens,
                total_tokens: data.usage.input_tokens + data.usage.output_tokens,
            },
            tool_calls,
        })
    }

    async fn stream(
        &self,
        request: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamChunk, ValetError>>, ValetError> {
        debug!(model = %self.model_id, "Anthropic stream");

        let body = self.build_request_body(request, true);
        let response = self.post(&body).await?;
        let payloads = sse_data_stream(response.bytes_stream());

        let stream = async_stream::stream! {
            let mut state = BlockState::default();
            futures::pin_mut!(payloads);

            while let Some(payload) = payloads.next().await {
                let payload = match payload {
                    Ok(p) => p,
                    Err(err) => {
                        yield Err(err);
                        break;
                    }
                };
                let Ok(event) = serde_json::from_str::<Value>(&payload) else {
                    continue;
                };
                match state.ingest(&event) {
                    Ok(chunks) => {
                        for chunk in chunks {
                            yield Ok(chunk);
                        }
                    }
                    Err(err) => {
                        yield Err(err);
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

/// Tracks the open content block across streamed events. Anthropic
/// interleaves one block at a time, so a single slot is enough.
#[derive(Default)]
struct BlockState {
    open_tool_id: Option<String>,
    saw_tool_use: bool,
    done_emitted: bool,
}

impl BlockState {
    fn ingest(&mut self, event: &Value) -> Result<Vec<StreamChunk>, ValetError> {
        let kind = event.get("type").and_then(Value::as_str).unwrap_or("");
        let mut out = Vec::new();

        match kind {
            "content_block_start" => {
                let block = &event["content_block"];
                if block.get("type").and_then(Value::as_str) == Some("tool_use") {
                    let id = str_field(block, "id");
                    let name = str_field(block, "name");
                    self.open_tool_id = Some(id.clone());
                    self.saw_tool_use = true;
                    out.push(StreamChunk::ToolCallStart { id, name });
                }
            }
            "content_block_delta" => {
                let delta = &event["delta"];
                match delta.get("type").and_then(Value::as_str) {
                    Some("text_delta") => {
                        if let Some(text) = delta.get("text").and_then(Value::as_str) {
                            out.push(StreamChunk::TextDelta {
                                text: text.to_string(),
                            });
                        }
                    }
                    Some("input_json_delta") => {
                        let fragment = delta
                            .get("partial_json")
                            .and_then(Value::as_str)
                            .unwrap_or("");
                        if let (Some(id), false) = (&self.open_tool_id, fragment.is_empty()) {
                            out.push(StreamChunk::ToolCallDelta {
                                id: id.clone(),
                                arguments: fragment.to_string(),
                            });
                        }
                    }
                    _ => {}
                }
            }
            "content_block_stop" => {
                self.open_tool_id = None;
            }
            "message_delta" => {
                let stop = event
                    .pointer("/delta/stop_reason")
                    .and_then(Value::as_str);
                if stop.is_some() && !self.done_emitted {
                    self.done_emitted = true;
                    let usage = event
                        .pointer("/usage/output_tokens")
                        .and_then(Value::as_u64)
                        .map(|out_tokens| Usage {
                            output_tokens: out_tokens as u32,
                            ..Default::default()
                        });
                    out.push(StreamChunk::Done {
                        finish_reason: self.finish(normalize_stop_reason(stop)),
                        usage,
                    });
                }
            }
            "message_stop" => {
                if !self.done_emitted {
                    self.done_emitted = true;
                    out.push(StreamChunk::Done {
                        finish_reason: self.finish(FinishReason::Stop),
                        usage: None,
                    });
                }
            }
            "error" => {
                let message = event
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("stream error");
                return Err(ValetError::Stream(message.to_string()));
            }
            _ => {}
        }

        Ok(out)
    }

    fn finish(&self, fallback: FinishReason) -> FinishReason {
        if self.saw_tool_use {
            FinishReason::ToolCalls
        } else {
            fallback
        }
    }
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Separate system text (joined into the `system` field) from the
/// conversational messages.
fn split_messages(messages: &[crate::types::ModelMessage]) -> (Option<String>, Vec<Value>) {
    let mut system_parts = Vec::new();
    let mut wire = Vec::new();

    for msg in messages {
        match msg.role {
            Role::System => system_parts.push(msg.text()),
            Role::User => wire.push(json!({"role": "user", "content": msg.text()})),
            Role::Assistant => {
                let mut blocks = Vec::new();
                for part in &msg.content {
                    match part {
                        ContentPart::Text { text } if !text.is_empty() => {
                            blocks.push(json!({"type": "text", "text": text}));
                        }
                        ContentPart::ToolCall(call) => {
                            blocks.push(json!({
                                "type": "tool_use",
                                "id": call.id,
                                "name": call.name,
                                "input": call.arguments,
                            }));
                        }
                        _ => {}
                    }
                }
                if !blocks.is_empty() {
                    wire.push(json!({"role": "assistant", "content": blocks}));
                }
            }
            // Tool results ride in a user-role message of result blocks.
            Role::Tool => {
                for part in &msg.content {
                    if let ContentPart::ToolOutput(output) = part {
                        wire.push(json!({
                            "role": "user",
                            "content": [{
                                "type": "tool_result",
                                "tool_use_id": output.call_id,
                                "content": output.result.to_string(),
                                "is_error": output.is_error,
                            }],
                        }));
                    }
                }
            }
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n"))
    };
    (system, wire)
}

fn normalize_stop_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("max_tokens") => FinishReason::Length,
        Some("tool_use") => FinishReason::ToolCalls,
        Some("refusal") => FinishReason::Error,
        // end_turn, stop_sequence, and anything unknown.
        _ => FinishReason::Stop,
    }
}

#[derive(Deserialize)]
struct WireResponse {
    content: Vec<WireBlock>,
    stop_reason: Option<String>,
    usage: WireUsage,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct WireUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ToolDefinition;
    use crate::types::{GenerationSettings, ModelMessage};

    fn provider() -> AnthropicProvider {
        AnthropicProvider::new(
            "claude-sonnet-4-20250514".to_string(),
            "test-key".to_string(),
            None,
        )
    }

    #[test]
    fn system_messages_become_system_field() {
        let request = ChatRequest {
            messages: vec![
                ModelMessage::system("You schedule meetings."),
                ModelMessage::user("hello"),
            ],
            settings: GenerationSettings::default(),
            tools: None,
        };
        let body = provider().build_request_body(&request, false);
        assert_eq!(body["system"], "You schedule meetings.");
        assert_eq!(body["messages"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn required_tool_choice_maps_to_any() {
        let request = ChatRequest {
            messages: vec![ModelMessage::user("hello")],
            settings: GenerationSettings {
                tool_choice: Some(ToolChoice::Required),
                ..Default::default()
            },
            tools: Some(vec![ToolDefinition {
                name: "update_event".to_string(),
                description: "Update an event".to_string(),
                parameters: json!({"type": "object", "properties": {}}),
            }]),
        };
        let body = provider().build_request_body(&request, false);
        assert_eq!(body["tool_choice"]["type"], "any");
        assert_eq!(body["tools"][0]["name"], "update_event");
    }

    #[test]
    fn single_call_mode_disables_parallel_tool_use() {
        let request = ChatRequest {
            messages: vec![ModelMessage::user("hello")],
            settings: GenerationSettings {
                parallel_tool_calls: Some(false),
                ..Default::default()
            },
            tools: None,
        };
        let body = provider().build_request_body(&request, false);
        assert_eq!(body["tool_choice"]["disable_parallel_tool_use"], true);
    }

    #[test]
    fn message_stop_without_prior_delta_closes_the_stream_once() {
        let mut state = BlockState::default();
        let delta = json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}});
        let stop = json!({"type": "message_stop"});

        let first = state.ingest(&delta).unwrap();
        assert!(matches!(first[0], StreamChunk::Done { .. }));
        assert!(state.ingest(&stop).unwrap().is_empty());
    }

    #[test]
    fn stop_reason_normalization() {
        assert_eq!(normalize_stop_reason(Some("end_turn")), FinishReason::Stop);
        assert_eq!(
            normalize_stop_reason(Some("max_tokens")),
            FinishReason::Length
        );
        assert_eq!(
            normalize_stop_reason(Some("tool_use")),
            FinishReason::ToolCalls
        );
    }
}
