//! Agent profile catalog and model resolution.
//!
//! A profile is the billing-facing persona a user selects: display copy,
//! subscription tier gating, capability flags, and the model configuration
//! behind it. Profiles are immutable catalog entries; lookups never fail,
//! they fall back to the default profile.

pub mod models;

pub use models::{resolve_model, ModelSpec, ModelTier, Provider, DEFAULT_PROVIDER};

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Profile used when an unknown id is requested.
pub const DEFAULT_PROFILE_ID: &str = "ally-lite";

/// Subscription tier gating profile access.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SubscriptionTier {
    Free,
    Pro,
    Enterprise,
}

/// Feature flags a profile grants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AgentCapability {
    CalendarRead,
    CalendarWrite,
    GapAnalysis,
    SmartScheduling,
    MultiCalendar,
    Voice,
}

/// Tone knobs folded into the system prompt.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PersonalityConfig {
    /// 0.0 = verbose, 1.0 = terse.
    pub conciseness: f64,
    /// 0.0 = formal, 1.0 = casual.
    pub casualness: f64,
    pub notes: &'static str,
}

/// Model configuration carried by a profile.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    pub provider: Provider,
    pub tier: ModelTier,
}

/// A selectable assistant persona.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AgentProfile {
    pub id: &'static str,
    pub display_name: &'static str,
    pub tagline: &'static str,
    pub description: &'static str,
    pub tier: SubscriptionTier,
    pub capabilities: Vec<AgentCapability>,
    pub model_config: ModelConfig,
    pub personality: PersonalityConfig,
}

static PROFILES: OnceLock<Vec<AgentProfile>> = OnceLock::new();

fn base_capabilities() -> Vec<AgentCapability> {
    vec![AgentCapability::CalendarRead, AgentCapability::CalendarWrite]
}

fn pro_capabilities() -> Vec<AgentCapability> {
    vec![
        AgentCapability::CalendarRead,
        AgentCapability::CalendarWrite,
        AgentCapability::GapAnalysis,
        AgentCapability::SmartScheduling,
        AgentCapability::MultiCalendar,
    ]
}

/// The built-in profile catalog.
pub fn builtin_profiles() -> &'static [AgentProfile] {
    PROFILES.get_or_init(|| {
        vec![
            AgentProfile {
                id: "ally-lite",
                display_name: "Ally Lite",
                tagline: "Quick and free",
                description: "Fast everyday scheduling on the free tier.",
                tier: SubscriptionTier::Free,
                capabilities: base_capabilities(),
                model_config: ModelConfig {
                    provider: Provider::OpenAi,
                    tier: ModelTier::Fast,
                },
                personality: PersonalityConfig {
                    conciseness: 0.8,
                    casualness: 0.6,
                    notes: "Keep answers short and friendly.",
                },
            },
            AgentProfile {
                id: "ally-pro",
                display_name: "Ally Pro",
                tagline: "Your everyday planner",
                description: "Balanced model with smart scheduling and gap analysis.",
                tier: SubscriptionTier::Pro,
                capabilities: pro_capabilities(),
                model_config: ModelConfig {
                    provider: Provider::OpenAi,
                    tier: ModelTier::Balanced,
                },
                personality: PersonalityConfig {
                    conciseness: 0.5,
                    casualness: 0.5,
                    notes: "Professional but approachable.",
                },
            },
            AgentProfile {
                id: "ally-flash",
                display_name: "Ally Flash",
                tagline: "Speed above all",
                description: "Lowest-latency responses for power users.",
                tier: SubscriptionTier::Pro,
                capabilities: base_capabilities(),
                model_config: ModelConfig {
                    provider: Provider::OpenAi,
                    tier: ModelTier::Fast,
                },
                personality: PersonalityConfig {
                    conciseness: 0.9,
                    casualness: 0.4,
                    notes: "One-line answers where possible.",
                },
            },
            AgentProfile {
                id: "ally-executive",
                display_name: "Ally Executive",
                tagline: "Full-calendar command",
                description: "Most capable model for dense multi-calendar schedules.",
                tier: SubscriptionTier::Enterprise,
                capabilities: pro_capabilities(),
                model_config: ModelConfig {
                    provider: Provider::OpenAi,
                    tier: ModelTier::Powerful,
                },
                personality: PersonalityConfig {
                    conciseness: 0.4,
                    casualness: 0.2,
                    notes: "Formal, thorough, anticipates conflicts.",
                },
            },
            AgentProfile {
                id: "ally-gemini",
                display_name: "Ally Gemini",
                tagline: "Google-native planning",
                description: "Balanced Gemini model, best with Google Workspace data.",
                tier: SubscriptionTier::Pro,
                capabilities: pro_capabilities(),
                model_config: ModelConfig {
                    provider: Provider::Google,
                    tier: ModelTier::Balanced,
                },
                personality: PersonalityConfig {
                    conciseness: 0.5,
                    casualness: 0.5,
                    notes: "Professional but approachable.",
                },
            },
            AgentProfile {
                id: "ally-claude",
                display_name: "Ally Claude",
                tagline: "Thoughtful scheduling",
                description: "Balanced Claude model with careful reasoning.",
                tier: SubscriptionTier::Pro,
                capabilities: pro_capabilities(),
                model_config: ModelConfig {
                    provider: Provider::Anthropic,
                    tier: ModelTier::Balanced,
                },
                personality: PersonalityConfig {
                    conciseness: 0.4,
                    casualness: 0.5,
                    notes: "Explains trade-offs when rescheduling.",
                },
            },
        ]
    })
}

/// Look up a profile by id, falling back to the default profile.
pub fn get_agent_profile(id: &str) -> &'static AgentProfile {
    let profiles = builtin_profiles();
    profiles
        .iter()
        .find(|p| p.id == id)
        .or_else(|| profiles.iter().find(|p| p.id == DEFAULT_PROFILE_ID))
        .expect("default profile must exist in the catalog")
}

/// All profiles available at or below a subscription tier.
pub fn profiles_for_tier(tier: SubscriptionTier) -> Vec<&'static AgentProfile> {
    builtin_profiles()
        .iter()
        .filter(|p| p.tier <= tier)
        .collect()
}

/// Resolve the concrete model spec behind a profile.
pub fn get_model_spec(profile: &AgentProfile) -> ModelSpec {
    resolve_model(profile.model_config.provider, profile.model_config.tier)
}

/// Resolve a model spec for a specific tier override, keeping the
/// profile's provider. Used for sub-agents that run on a cheaper tier
/// than the persona's headline model.
pub fn get_model_spec_for_tier(profile: &AgentProfile, tier: ModelTier) -> ModelSpec {
    resolve_model(profile.model_config.provider, tier)
}
