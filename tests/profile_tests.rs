//! Profile catalog and model resolution tests.

use valet::profile::{
    builtin_profiles, get_agent_profile, get_model_spec, get_model_spec_for_tier,
    profiles_for_tier, resolve_model, ModelTier, Provider, SubscriptionTier, DEFAULT_PROFILE_ID,
};

#[test]
fn every_builtin_profile_resolves_to_a_model() {
    for profile in builtin_profiles() {
        let spec = get_model_spec(profile);
        assert_eq!(spec.provider, profile.model_config.provider, "{}", profile.id);
        assert!(!spec.model_id.is_empty());
        assert!(spec.supports_tools);
    }
}

#[test]
fn unknown_profile_falls_back_to_default() {
    let profile = get_agent_profile("does-not-exist");
    assert_eq!(profile.id, DEFAULT_PROFILE_ID);
    // Lookup is total: the fallback itself resolves.
    let spec = get_model_spec(profile);
    assert_eq!(spec.provider, Provider::OpenAi);
}

#[test]
fn tier_gating_is_inclusive_downward() {
    let free: Vec<_> = profiles_for_tier(SubscriptionTier::Free)
        .iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(free, vec![DEFAULT_PROFILE_ID]);

    let pro = profiles_for_tier(SubscriptionTier::Pro);
    assert!(pro.iter().any(|p| p.id == DEFAULT_PROFILE_ID));
    assert!(pro.iter().any(|p| p.id == "ally-pro"));
    assert!(!pro.iter().any(|p| p.id == "ally-executive"));

    let enterprise = profiles_for_tier(SubscriptionTier::Enterprise);
    assert_eq!(enterprise.len(), builtin_profiles().len());
}

#[test]
fn sub_agent_tier_override_keeps_the_provider() {
    let profile = get_agent_profile("ally-claude");
    let headline = get_model_spec(profile);
    let cheap = get_model_spec_for_tier(profile, ModelTier::Fast);

    assert_eq!(headline.provider, Provider::Anthropic);
    assert_eq!(cheap.provider, Provider::Anthropic);
    assert_ne!(headline.model_id, cheap.model_id);
    assert_eq!(cheap.model_id, "claude-3-5-haiku-20241022");
}

#[test]
fn model_resolution_is_total_and_repeatable() {
    for provider in [Provider::OpenAi, Provider::Anthropic, Provider::Google] {
        for tier in [ModelTier::Fast, ModelTier::Balanced, ModelTier::Powerful] {
            let a = resolve_model(provider, tier);
            let b = resolve_model(provider, tier);
            assert_eq!(a, b);
            assert_eq!(a.provider, provider);
        }
    }
}

#[test]
fn gemini_profile_uses_google_models() {
    let profile = get_agent_profile("ally-gemini");
    let spec = get_model_spec(profile);
    assert_eq!(spec.provider, Provider::Google);
    assert_eq!(spec.model_id, "gemini-2.5-flash");
}
