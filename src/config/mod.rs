//! Runtime configuration (code > env).

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};

/// Global default config (lazy-initialized from env).
static DEFAULT_CONFIG: OnceLock<ValetConfig> = OnceLock::new();

const DEFAULT_AUTH_URL_BASE: &str = "https://localhost:8080/auth/google";

/// Provider credentials and endpoint overrides.
///
/// Explicit setters take precedence over values loaded from the
/// environment.
#[derive(Clone)]
pub struct ValetConfig {
    api_keys: Arc<RwLock<HashMap<String, String>>>,
    base_urls: Arc<RwLock<HashMap<String, String>>>,
    auth_url_base: Arc<RwLock<Option<String>>>,
}

impl fmt::Debug for ValetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let providers: Vec<String> = self
            .api_keys
            .read()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        f.debug_struct("ValetConfig")
            .field("api_keys", &providers)
            .field("base_urls", &self.base_urls)
            .finish()
    }
}

impl Default for ValetConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ValetConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self {
            api_keys: Arc::new(RwLock::new(HashMap::new())),
            base_urls: Arc::new(RwLock::new(HashMap::new())),
            auth_url_base: Arc::new(RwLock::new(None)),
        }
    }

    /// Load from environment variables (OPENAI_API_KEY, ANTHROPIC_API_KEY, etc.).
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let config = Self::new();

        let env_mappings = [
            ("OPENAI_API_KEY", "openai"),
            ("ANTHROPIC_API_KEY", "anthropic"),
            ("GOOGLE_API_KEY", "google"),
            ("GEMINI_API_KEY", "google"),
        ];

        for (env_var, provider) in &env_mappings {
            if let Ok(key) = std::env::var(env_var) {
                config.set_api_key(provider, key);
            }
        }

        let url_mappings = [
            ("OPENAI_BASE_URL", "openai"),
            ("ANTHROPIC_BASE_URL", "anthropic"),
            ("GOOGLE_BASE_URL", "google"),
        ];

        for (env_var, provider) in &url_mappings {
            if let Ok(url) = std::env::var(env_var) {
                config.set_base_url(provider, url);
            }
        }

        if let Ok(url) = std::env::var("AUTH_URL_BASE") {
            config.set_auth_url_base(url);
        }

        config
    }

    /// Get (or create) the global default config.
    pub fn global() -> &'static ValetConfig {
        DEFAULT_CONFIG.get_or_init(Self::from_env)
    }

    pub fn set_api_key(&self, provider: &str, key: String) {
        if let Ok(mut keys) = self.api_keys.write() {
            keys.insert(provider.to_string(), key);
        }
    }

    pub fn get_api_key(&self, provider: &str) -> Option<String> {
        self.api_keys.read().ok()?.get(provider).cloned()
    }

    pub fn set_base_url(&self, provider: &str, url: String) {
        if let Ok(mut urls) = self.base_urls.write() {
            urls.insert(provider.to_string(), url);
        }
    }

    pub fn get_base_url(&self, provider: &str) -> Option<String> {
        self.base_urls.read().ok()?.get(provider).cloned()
    }

    /// Base URL for the Google OAuth consent redirect handed to
    /// unregistered users.
    pub fn auth_url_base(&self) -> String {
        self.auth_url_base
            .read()
            .ok()
            .and_then(|v| v.clone())
            .unwrap_or_else(|| DEFAULT_AUTH_URL_BASE.to_string())
    }

    pub fn set_auth_url_base(&self, url: String) {
        if let Ok(mut base) = self.auth_url_base.write() {
            *base = Some(url);
        }
    }

    /// Check if a provider has credentials configured.
    pub fn has_credentials(&self, provider: &str) -> bool {
        self.get_api_key(provider).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_returns_none() {
        let config = ValetConfig::new();
        assert_eq!(config.get_api_key("openai"), None);
        assert!(!config.has_credentials("openai"));
    }

    #[test]
    fn explicit_key_is_returned() {
        let config = ValetConfig::new();
        config.set_api_key("anthropic", "sk-test".to_string());
        assert_eq!(config.get_api_key("anthropic"), Some("sk-test".to_string()));
        assert!(config.has_credentials("anthropic"));
    }

    #[test]
    fn base_url_override_round_trips() {
        let config = ValetConfig::new();
        config.set_base_url("openai", "http://localhost:9999/v1".to_string());
        assert_eq!(
            config.get_base_url("openai"),
            Some("http://localhost:9999/v1".to_string())
        );
        assert_eq!(config.get_base_url("google"), None);
    }

    #[test]
    fn auth_url_base_has_default() {
        let config = ValetConfig::new();
        assert_eq!(config.auth_url_base(), DEFAULT_AUTH_URL_BASE);
        config.set_auth_url_base("https://api.example.com/auth/google".to_string());
        assert_eq!(
            config.auth_url_base(),
            "https://api.example.com/auth/google"
        );
    }
}
