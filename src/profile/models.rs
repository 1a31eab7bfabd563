//! Model registry: (provider, tier) resolution to concrete model specs.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Supported model backends.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Anthropic,
    Google,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Google => "google",
        }
    }
}

/// Abstract capability tier, resolved per provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ModelTier {
    Fast,
    Balanced,
    Powerful,
}

/// Resolved model parameters for a provider call.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ModelSpec {
    pub provider: Provider,
    pub model_id: &'static str,
    pub max_tokens: u32,
    pub temperature: f64,
    pub supports_tools: bool,
}

const MODEL_TABLE: &[(Provider, ModelTier, &str, u32, f64)] = &[
    (Provider::OpenAi, ModelTier::Fast, "gpt-4o-mini", 4096, 0.7),
    (Provider::OpenAi, ModelTier::Balanced, "gpt-4o", 8192, 0.7),
    (Provider::OpenAi, ModelTier::Powerful, "gpt-4.1", 16384, 0.6),
    (
        Provider::Anthropic,
        ModelTier::Fast,
        "claude-3-5-haiku-20241022",
        4096,
        0.7,
    ),
    (
        Provider::Anthropic,
        ModelTier::Balanced,
        "claude-sonnet-4-20250514",
        8192,
        0.7,
    ),
    (
        Provider::Anthropic,
        ModelTier::Powerful,
        "claude-opus-4-20250514",
        16384,
        0.6,
    ),
    (
        Provider::Google,
        ModelTier::Fast,
        "gemini-2.0-flash",
        4096,
        0.7,
    ),
    (
        Provider::Google,
        ModelTier::Balanced,
        "gemini-2.5-flash",
        8192,
        0.7,
    ),
    (
        Provider::Google,
        ModelTier::Powerful,
        "gemini-2.5-pro",
        16384,
        0.6,
    ),
];

/// Default provider used when a requested pair has no table entry.
pub const DEFAULT_PROVIDER: Provider = Provider::OpenAi;

fn lookup(provider: Provider, tier: ModelTier) -> Option<ModelSpec> {
    MODEL_TABLE
        .iter()
        .find(|(p, t, ..)| *p == provider && *t == tier)
        .map(|(provider, _, model_id, max_tokens, temperature)| ModelSpec {
            provider: *provider,
            model_id,
            max_tokens: *max_tokens,
            temperature: *temperature,
            supports_tools: true,
        })
}

/// Resolve a (provider, tier) pair to a concrete model spec.
///
/// A pair with no table entry falls back to the default provider's
/// balanced tier so resolution always succeeds. Pure and repeatable.
pub fn resolve_model(provider: Provider, tier: ModelTier) -> ModelSpec {
    lookup(provider, tier)
        .or_else(|| lookup(DEFAULT_PROVIDER, tier))
        .or_else(|| lookup(DEFAULT_PROVIDER, ModelTier::Balanced))
        .unwrap_or(ModelSpec {
            provider: DEFAULT_PROVIDER,
            model_id: "gpt-4o",
            max_tokens: 8192,
            temperature: 0.7,
            supports_tools: true,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_pair_resolves() {
        for provider in [Provider::OpenAi, Provider::Anthropic, Provider::Google] {
            for tier in [ModelTier::Fast, ModelTier::Balanced, ModelTier::Powerful] {
                let spec = resolve_model(provider, tier);
                assert_eq!(spec.provider, provider);
                assert!(!spec.model_id.is_empty());
                assert!(spec.supports_tools);
            }
        }
    }

    #[test]
    fn resolution_is_repeatable() {
        let a = resolve_model(Provider::Google, ModelTier::Balanced);
        let b = resolve_model(Provider::Google, ModelTier::Balanced);
        assert_eq!(a, b);
        assert_eq!(a.model_id, "gemini-2.5-flash");
    }
}
