//! Model provider trait and implementations.
//!
//! Each backend converts the uniform [`ChatRequest`] into its wire dialect
//! and converts responses back into the shared types. Wire structs never
//! leave the adapter that owns them; adding a backend means adding one
//! module here and one arm to [`create_provider`].

pub mod anthropic;
pub mod google;
pub mod http;
pub mod openai;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::config::ValetConfig;
use crate::error::ValetError;
use crate::profile::{ModelSpec, Provider};
use crate::types::{FinishReason, GenerationSettings, ModelMessage, StreamChunk, ToolCall, Usage};

/// A request sent to a model provider.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ModelMessage>,
    pub settings: GenerationSettings,
    pub tools: Option<Vec<ToolDefinition>>,
}

/// Tool definition sent to the provider API.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Response from a provider.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
}

/// Core trait implemented by all model providers.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name (e.g., "openai", "google").
    fn provider_name(&self) -> &str;
    /// The model ID this provider instance serves.
    fn model_id(&self) -> &str;

    /// Run a chat completion (non-streaming).
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ValetError>;

    /// Run a chat completion, streaming normalized chunks.
    async fn stream(
        &self,
        request: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamChunk, ValetError>>, ValetError>;
}

/// Create a provider for the given model spec, using the provided config.
pub fn create_provider(
    spec: &ModelSpec,
    config: &ValetConfig,
) -> Result<Box<dyn ModelProvider>, ValetError> {
    match spec.provider {
        Provider::OpenAi => {
            let api_key = config
                .get_api_key("openai")
                .ok_or_else(|| ValetError::Authentication("Missing OPENAI_API_KEY".into()))?;
            Ok(Box::new(openai::OpenAiProvider::new(
                spec.model_id.to_string(),
                api_key,
                config.get_base_url("openai"),
            )))
        }
        Provider::Anthropic => {
            let api_key = config
                .get_api_key("anthropic")
                .ok_or_else(|| ValetError::Authentication("Missing ANTHROPIC_API_KEY".into()))?;
            Ok(Box::new(anthropic::AnthropicProvider::new(
                spec.model_id.to_string(),
                api_key,
                config.get_base_url("anthropic"),
            )))
        }
        Provider::Google => {
            let api_key = config
                .get_api_key("google")
                .ok_or_else(|| ValetError::Authentication("Missing GOOGLE_API_KEY".into()))?;
            Ok(Box::new(google::GoogleProvider::new(
                spec.model_id.to_string(),
                api_key,
                config.get_base_url("google"),
            )))
        }
    }
}
