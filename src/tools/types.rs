//! Tool-related types: parameter schemas, contexts, outcomes.

use serde::{Deserialize, Serialize};

use crate::types::ToolCall;

/// Per-request identity available to every handler.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub user_id: String,
    pub email: Option<String>,
    /// IANA timezone for the user, when known.
    pub timezone: Option<String>,
}

impl ToolContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: None,
            timezone: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }
}

/// Outcome of a single tool execution: a value or an error, never both.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Ok { value: serde_json::Value },
    Err { message: String },
}

impl ToolOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, ToolOutcome::Err { .. })
    }

    /// JSON placed in the transcript: the value itself, or an error object
    /// the model can read and react to.
    pub fn to_transcript_json(&self) -> serde_json::Value {
        match self {
            ToolOutcome::Ok { value } => value.clone(),
            ToolOutcome::Err { message } => serde_json::json!({ "error": message }),
        }
    }
}

/// Result for one call in a batch. Every call gets exactly one of these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolExecutionResult {
    pub call_id: String,
    pub name: String,
    pub outcome: ToolOutcome,
}

impl ToolExecutionResult {
    pub fn ok(call: &ToolCall, value: serde_json::Value) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            outcome: ToolOutcome::Ok { value },
        }
    }

    pub fn err(call: &ToolCall, message: impl Into<String>) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            outcome: ToolOutcome::Err {
                message: message.into(),
            },
        }
    }

    pub fn is_error(&self) -> bool {
        self.outcome.is_error()
    }

    /// Whether the failure needs the user to complete an OAuth consent
    /// flow before the operation can succeed.
    pub fn needs_authorization(&self) -> bool {
        match &self.outcome {
            ToolOutcome::Err { message } => message.starts_with(AUTH_REQUIRED_PREFIX),
            ToolOutcome::Ok { .. } => false,
        }
    }
}

/// Prefix carried by error messages for authorization failures, so the
/// driver can route them to the auth-URL fallback.
pub const AUTH_REQUIRED_PREFIX: &str = "authorization_required:";

/// JSON Schema-based parameter definition for a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameters {
    /// JSON Schema object describing the parameters.
    pub schema: serde_json::Value,
}

impl ToolParameters {
    /// Wrap an existing JSON Schema value.
    pub fn from_schema(schema: serde_json::Value) -> Self {
        Self { schema }
    }

    /// Schema for a tool taking no parameters.
    pub fn empty() -> Self {
        ParameterBuilder::default().build()
    }

    /// Start an object schema, adding properties fluently.
    pub fn object() -> ParameterBuilder {
        ParameterBuilder::default()
    }
}

/// Accumulates properties for an object schema.
#[derive(Default)]
pub struct ParameterBuilder {
    properties: serde_json::Map<String, serde_json::Value>,
    required: Vec<String>,
}

impl ParameterBuilder {
    fn property(
        mut self,
        kind: &str,
        name: impl Into<String>,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        let name = name.into();
        self.properties.insert(
            name.clone(),
            serde_json::json!({"type": kind, "description": description.into()}),
        );
        if required {
            self.required.push(name);
        }
        self
    }

    pub fn string(
        self,
        name: impl Into<String>,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        self.property("string", name, description, required)
    }

    pub fn number(
        self,
        name: impl Into<String>,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        self.property("number", name, description, required)
    }

    pub fn boolean(
        self,
        name: impl Into<String>,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        self.property("boolean", name, description, required)
    }

    pub fn build(self) -> ToolParameters {
        ToolParameters {
            schema: serde_json::json!({
                "type": "object",
                "properties": self.properties,
                "required": self.required,
            }),
        }
    }
}
