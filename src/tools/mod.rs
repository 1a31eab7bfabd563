//! Tool dispatch: registry, handler conventions, and the built-in leaf tools.

pub mod account;
pub mod backend;
pub mod calendar;
pub mod registry;
pub mod types;

pub use backend::{CalendarBackend, Services, UserDirectory};
pub use registry::{Handler, ToolRegistry, ToolSpec};
pub use types::{ToolContext, ToolExecutionResult, ToolOutcome, ToolParameters};

use crate::config::ValetConfig;

/// Build the full leaf-tool dispatch table.
pub fn builtin_registry(services: Services, config: ValetConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    calendar::register_calendar_tools(&mut registry, services.clone());
    account::register_account_tools(&mut registry, services, config);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_contains_expected_tools() {
        let registry = builtin_registry(Services::in_memory(), ValetConfig::new());
        for name in [
            "get_event",
            "insert_event",
            "update_event",
            "delete_event",
            "check_conflicts",
            "select_calendar",
            "pre_create_validation",
            "summarize_events",
            "validate_user",
            "register_user",
            "get_timezone",
            "generate_auth_url",
        ] {
            assert!(registry.contains(name), "missing tool: {name}");
        }
    }
}
