//! Google Gemini adapter, using the generateContent REST surface.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::ValetError;
use crate::types::{ContentPart, FinishReason, Role, StreamChunk, ToolCall, ToolChoice, Usage};

use super::http::{shared_client, sse_data_stream, status_to_error};
use super::{ChatRequest, ChatResponse, ModelProvider};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GoogleProvider {
    model_id: String,
    api_key: String,
    base_url: String,
}

impl GoogleProvider {
    pub fn new(model_id: String, api_key: String, base_url: Option<String>) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model_id,
            api_key,
        }
    }

    fn endpoint(&self, method: &str, query: &str) -> String {
        format!(
            "{}/models/{}:{method}?{query}key={}",
            self.base_url, self.model_id, self.api_key
        )
    }

    fn build_request_body(&self, request: &ChatRequest) -> Value {
        let mut body = Map::new();
        let (system, contents) = convert_messages(&request.messages);
        body.insert("contents".into(), contents.into());
        if let Some(system) = system {
            body.insert("systemInstruction".into(), system);
        }

        let mut generation = Map::new();
        if let Some(max) = request.settings.max_tokens {
            generation.insert("maxOutputTokens".into(), max.into());
        }
        if let Some(temperature) = request.settings.temperature {
            generation.insert("temperature".into(), temperature.into());
        }
        if let Some(top_p) = request.settings.top_p {
            generation.insert("topP".into(), top_p.into());
        }
        if let Some(ref stops) = request.settings.stop_sequences {
            generation.insert("stopSequences".into(), json!(stops));
        }
        if !generation.is_empty() {
            body.insert("generationConfig".into(), Value::Object(generation));
        }

        if let Some(tools) = request.tools.as_deref().filter(|t| !t.is_empty()) {
            let declarations: Vec<Value> = tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    })
                })
                .collect();
            body.insert(
                "tools".into(),
                json!([{"functionDeclarations": declarations}]),
            );
        }

        if request.settings.tool_choice == Some(ToolChoice::Required) {
            body.insert(
                "toolConfig".into(),
                json!({"functionCallingConfig": {"mode": "ANY"}}),
            );
        }

        Value::Object(body)
    }
}

#[async_trait]
impl ModelProvider for GoogleProvider {
    fn provider_name(&self) -> &str {
        "google"
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ValetError> {
        debug!(model = %self.model_id, "Google chat");

        let body = self.build_request_body(request);
        let response = shared_client()
            .post(self.endpoint("generateContent", ""))
            .json(&body)
            .send()
            .await?;

        let status = response.status().as_u16();
        if status != 200 {
            let detail = response.text().await.unwrap_or_default();
            return Err(status_to_error(status, &detail));
        }

        let data: WireResponse = response.json().await?;
        let candidate = data
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ValetError::api(200, "empty candidates in Gemini response"))?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for part in candidate.content.parts {
            if let Some(t) = part.text {
                text.push_str(&t);
            }
            if let Some(call) = part.function_call {
                tool_calls.push(synthesize_call(call));
            }
        }

        let finish_reason = if tool_calls.is_empty() {
            normalize_finish_reason(candidate.finish_reason.as_deref())
        } else {
            FinishReason::ToolCalls
        };

        Ok(ChatResponse {
            text,
            tool_calls,
            finish_reason,
            usage: data.usage_metadata.map(WireUsage::into_usage).unwrap_or_default(),
        })
    }

    async fn stream(
        &self,
        request: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamChunk, ValetError>>, ValetError> {
        debug!(model = %self.model_id, "Google stream");

        let body = self.build_request_body(request);
        let response = shared_client()
            .post(self.endpoint("streamGenerateContent", "alt=sse&"))
            .json(&body)
            .send()
            .await?;

        let status = response.status().as_u16();
        if status != 200 {
            let detail = response.text().await.unwrap_or_default();
            return Err(status_to_error(status, &detail));
        }

        let payloads = sse_data_stream(response.bytes_stream());

        let stream = async_stream::stream! {
            let mut saw_function_call = false;
            futures::pin_mut!(payloads);

            while let Some(payload) = payloads.next().await {
                let payload = match payload {
                    Ok(p) => p,
                    Err(err) => {
                        yield Err(err);
                        break;
                    }
                };
                let Ok(wire) = serde_json::from_str::<WireResponse>(&payload) else {
                    continue;
                };
                let usage = wire.usage_metadata;
                let Some(candidate) = wire.candidates.into_iter().next() else {
                    continue;
                };

                for part in candidate.content.parts {
                    if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                        yield Ok(StreamChunk::TextDelta { text });
                    }
                    // Function calls arrive whole: open the call, then
                    // deliver the full arguments as a single delta.
                    if let Some(call) = part.function_call {
                        let call = synthesize_call(call);
                        saw_function_call = true;
                        yield Ok(StreamChunk::ToolCallStart {
                            id: call.id.clone(),
                            name: call.name,
                        });
                        yield Ok(StreamChunk::ToolCallDelta {
                            id: call.id,
                            arguments: call.arguments.to_string(),
                        });
                    }
                }

                if let Some(reason) = candidate.finish_reason.as_deref() {
                    let finish_reason = if saw_function_call {
                        FinishReason::ToolCalls
                    } else {
                        normalize_finish_reason(Some(reason))
                    };
                    yield Ok(StreamChunk::Done {
                        finish_reason,
                        usage: usage.map(WireUsage::into_usage),
                    });
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

/// Gemini does not assign call ids, so one is generated to keep the
/// transcript pairing uniform across providers.
fn synthesize_call(call: WireFunctionCall) -> ToolCall {
    ToolCall {
        id: uuid::Uuid::new_v4().to_string(),
        name: call.name,
        arguments: call.args.unwrap_or_else(|| json!({})),
    }
}

/// Split out the system instruction and convert the rest to Gemini
/// `contents` entries.
fn convert_messages(messages: &[crate::types::ModelMessage]) -> (Option<Value>, Vec<Value>) {
    let mut system = None;
    let mut contents = Vec::new();

    for msg in messages {
        match msg.role {
            Role::System => {
                system = Some(json!({"parts": [{"text": msg.text()}]}));
            }
            Role::User => {
                contents.push(json!({"role": "user", "parts": [{"text": msg.text()}]}));
            }
            Role::Assistant => {
                let mut parts = Vec::new();
                let text = msg.text();
                if !text.is_empty() {
                    parts.push(json!({"text": text}));
                }
                for call in msg.tool_calls() {
                    parts.push(json!({
                        "functionCall": {"name": call.name, "args": call.arguments}
                    }));
                }
                if !parts.is_empty() {
                    contents.push(json!({"role": "model", "parts": parts}));
                }
            }
            Role::Tool => {
                for part in &msg.content {
                    if let ContentPart::ToolOutput(output) = part {
                        contents.push(json!({
                            "role": "function",
                            "parts": [{
                                "functionResponse": {
                                    "name": output.call_id,
                                    "response": output.result,
                                }
                            }]
                        }));
                    }
                }
            }
        }
    }

    (system, contents)
}

fn normalize_finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("MAX_TOKENS") => FinishReason::Length,
        Some("SAFETY") | Some("RECITATION") => FinishReason::Error,
        // STOP and anything unrecognized.
        _ => FinishReason::Stop,
    }
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    candidates: Vec<WireCandidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireCandidate {
    #[serde(default)]
    content: WireContent,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct WireContent {
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Deserialize)]
struct WirePart {
    text: Option<String>,
    #[serde(rename = "functionCall")]
    function_call: Option<WireFunctionCall>,
}

#[derive(Deserialize)]
struct WireFunctionCall {
    name: String,
    args: Option<Value>,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u32,
    #[serde(rename = "totalTokenCount", default)]
    total_token_count: u32,
}

impl WireUsage {
    fn into_usage(self) -> Usage {
        Usage {
            input_tokens: self.prompt_token_count,
            output_tokens: self.candidates_token_count,
            total_tokens: self.total_token_count,
        }
    }
}
