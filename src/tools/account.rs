//! Account leaf tools: identity validation, registration, auth URLs.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::ValetConfig;
use crate::error::{Result, ValetError};

use super::backend::{RegistrationStatus, Services};
use super::registry::{Handler, ToolRegistry, ToolSpec};
use super::types::{ToolContext, ToolParameters};

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid regex"))
}

pub fn is_valid_email(email: &str) -> bool {
    email_regex().is_match(email)
}

/// Minimal percent-encoding for email query parameters.
fn encode_query(value: &str) -> String {
    value
        .replace('%', "%25")
        .replace('@', "%40")
        .replace('+', "%2B")
        .replace(' ', "%20")
}

pub(super) async fn validate_user(
    services: Services,
    args: Value,
    ctx: ToolContext,
) -> Result<Value> {
    let email = args
        .get("email")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .or(ctx.email);

    let Some(email) = email else {
        return Ok(json!({ "valid": false, "reason": "no email provided" }));
    };
    if !is_valid_email(&email) {
        return Ok(json!({ "valid": false, "reason": "malformed email" }));
    }

    match services.users.lookup_user(&email).await? {
        Some(record) => Ok(json!({
            "valid": true,
            "user_id": record.user_id,
            "timezone": record.timezone,
        })),
        None => Ok(json!({ "valid": false, "reason": "not registered" })),
    }
}

pub(super) async fn register_user(
    services: Services,
    args: Value,
    ctx: ToolContext,
) -> Result<Value> {
    let email = args
        .get("email")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .or(ctx.email)
        .ok_or_else(|| ValetError::InvalidArgument("email is required".into()))?;

    if !is_valid_email(&email) {
        return Err(ValetError::InvalidArgument(format!(
            "Invalid email address: {email}"
        )));
    }

    debug!(email = %email, "registering user");

    match services.users.register_user(&email).await? {
        RegistrationStatus::Registered { user_id } => Ok(json!({
            "status": "registered",
            "user_id": user_id,
        })),
        RegistrationStatus::NeedsAuth { auth_url } => Ok(json!({
            "status": "needs_auth",
            "auth_url": auth_url,
        })),
    }
}

pub(super) async fn get_timezone(services: Services, ctx: ToolContext) -> Result<Value> {
    if let Some(tz) = ctx.timezone {
        return Ok(json!({ "timezone": tz }));
    }
    let tz = services
        .users
        .timezone_for(&ctx.user_id)
        .await?
        .unwrap_or_else(|| "UTC".to_string());
    Ok(json!({ "timezone": tz }))
}

pub(super) fn generate_auth_url(config: &ValetConfig, ctx: &ToolContext) -> Result<Value> {
    let base = config.auth_url_base();
    let url = match ctx.email {
        Some(ref email) => format!("{base}?email={}", encode_query(email)),
        None => base,
    };
    Ok(json!({ "auth_url": url }))
}

/// Register every account leaf tool.
pub fn register_account_tools(
    registry: &mut ToolRegistry,
    services: Services,
    config: ValetConfig,
) {
    let svc = services.clone();
    registry.register(ToolSpec::new(
        "validate_user",
        "Check whether an email belongs to a registered user.",
        ToolParameters::object()
            .string("email", "Email to check (defaults to the caller's)", false)
            .build(),
        Handler::params_and_ctx(move |args, ctx| validate_user(svc.clone(), args, ctx)),
    ));

    let svc = services.clone();
    registry.register(ToolSpec::new(
        "register_user",
        "Register a new user by email; may require OAuth consent first.",
        ToolParameters::object()
            .string("email", "Email to register", true)
            .build(),
        Handler::params_and_ctx(move |args, ctx| register_user(svc.clone(), args, ctx)),
    ));

    let svc = services.clone();
    registry.register(ToolSpec::new(
        "get_timezone",
        "Return the caller's IANA timezone.",
        ToolParameters::empty(),
        Handler::ctx_only(move |ctx| get_timezone(svc.clone(), ctx)),
    ));

    registry.register(ToolSpec::new(
        "generate_auth_url",
        "Build the Google OAuth consent URL for the caller.",
        ToolParameters::empty(),
        Handler::sync(move |_args, ctx| generate_auth_url(&config, &ctx)),
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::backend::{MemoryDirectory, UserRecord};
    use std::sync::Arc;

    fn services() -> Services {
        let directory = MemoryDirectory::new();
        directory.add_user(UserRecord {
            user_id: "u1".to_string(),
            email: "sam@example.com".to_string(),
            timezone: Some("Europe/Berlin".to_string()),
        });
        Services {
            calendar: Arc::new(crate::tools::backend::MemoryCalendar::new()),
            users: Arc::new(directory),
        }
    }

    #[test]
    fn email_shape_validation() {
        assert!(is_valid_email("sam@example.com"));
        assert!(!is_valid_email("sam@example"));
        assert!(!is_valid_email("not an email"));
        assert!(!is_valid_email("@example.com"));
    }

    #[tokio::test]
    async fn known_user_validates() {
        let result = validate_user(
            services(),
            json!({"email": "sam@example.com"}),
            ToolContext::new("u1"),
        )
        .await
        .unwrap();
        assert_eq!(result["valid"], true);
        assert_eq!(result["user_id"], "u1");
    }

    #[tokio::test]
    async fn unknown_user_does_not_validate() {
        let result = validate_user(
            services(),
            json!({"email": "ghost@example.com"}),
            ToolContext::new("u1"),
        )
        .await
        .unwrap();
        assert_eq!(result["valid"], false);
    }

    #[tokio::test]
    async fn register_rejects_malformed_email() {
        let err = register_user(services(), json!({"email": "nope"}), ToolContext::new("u1"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Invalid email address"));
    }

    #[tokio::test]
    async fn register_surfaces_needs_auth() {
        let directory = MemoryDirectory::new();
        directory.require_auth("https://example.com/consent");
        let services = Services {
            calendar: Arc::new(crate::tools::backend::MemoryCalendar::new()),
            users: Arc::new(directory),
        };
        let result = register_user(
            services,
            json!({"email": "new@example.com"}),
            ToolContext::new("u1"),
        )
        .await
        .unwrap();
        assert_eq!(result["status"], "needs_auth");
        assert_eq!(result["auth_url"], "https://example.com/consent");
    }

    #[test]
    fn auth_url_includes_encoded_email() {
        let config = ValetConfig::new();
        config.set_auth_url_base("https://api.example.com/auth/google".to_string());
        let ctx = ToolContext::new("u1").with_email("sam+test@example.com");
        let result = generate_auth_url(&config, &ctx).unwrap();
        assert_eq!(
            result["auth_url"],
            "https://api.example.com/auth/google?email=sam%2Btest%40example.com"
        );
    }
}
