//! Tool dispatch table: registration, lookup, and concurrent fan-out.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::future::join_all;
use tracing::debug;

use crate::error::ValetError;
use crate::provider::ToolDefinition;
use crate::types::ToolCall;

use super::types::{
    ToolContext, ToolExecutionResult, ToolParameters, AUTH_REQUIRED_PREFIX,
};

type HandlerFuture = Pin<Box<dyn Future<Output = Result<serde_json::Value, ValetError>> + Send>>;

/// Async handler taking parsed arguments and the request context.
pub type ParamsAndCtxFn =
    Arc<dyn Fn(serde_json::Value, ToolContext) -> HandlerFuture + Send + Sync>;

/// Async handler that ignores arguments and works from context alone.
pub type CtxOnlyFn = Arc<dyn Fn(ToolContext) -> HandlerFuture + Send + Sync>;

/// Synchronous handler for pure computations.
pub type SyncFn =
    Arc<dyn Fn(serde_json::Value, ToolContext) -> Result<serde_json::Value, ValetError> + Send + Sync>;

/// A handler's calling convention, fixed at registration time.
///
/// The variant is declared when the tool is registered; dispatch never
/// inspects names or argument shapes to decide how to invoke a handler.
#[derive(Clone)]
pub enum Handler {
    ParamsAndCtx(ParamsAndCtxFn),
    CtxOnly(CtxOnlyFn),
    Sync(SyncFn),
}

impl Handler {
    /// Wrap an async `(args, ctx)` closure.
    pub fn params_and_ctx<F, Fut>(f: F) -> Self
    where
        F: Fn(serde_json::Value, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, ValetError>> + Send + 'static,
    {
        Handler::ParamsAndCtx(Arc::new(move |args, ctx| Box::pin(f(args, ctx))))
    }

    /// Wrap an async context-only closure.
    pub fn ctx_only<F, Fut>(f: F) -> Self
    where
        F: Fn(ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, ValetError>> + Send + 'static,
    {
        Handler::CtxOnly(Arc::new(move |ctx| Box::pin(f(ctx))))
    }

    /// Wrap a synchronous closure.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(serde_json::Value, ToolContext) -> Result<serde_json::Value, ValetError>
            + Send
            + Sync
            + 'static,
    {
        Handler::Sync(Arc::new(f))
    }

    async fn invoke(
        &self,
        args: serde_json::Value,
        ctx: ToolContext,
    ) -> Result<serde_json::Value, ValetError> {
        match self {
            Handler::ParamsAndCtx(f) => f(args, ctx).await,
            Handler::CtxOnly(f) => f(ctx).await,
            Handler::Sync(f) => f(args, ctx),
        }
    }
}

/// A registered tool: schema plus handler.
#[derive(Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: ToolParameters,
    pub handler: Handler,
}

impl ToolSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ToolParameters,
        handler: Handler,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler,
        }
    }
}

/// Static dispatch table built once at startup.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    // BTreeMap keeps known-tool listings deterministic.
    tools: BTreeMap<String, ToolSpec>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: ToolSpec) {
        self.tools.insert(spec.name.clone(), spec);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Names of every registered tool, sorted.
    pub fn known_names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Wire definition for one tool.
    pub fn definition(&self, name: &str) -> Option<ToolDefinition> {
        self.tools.get(name).map(|spec| ToolDefinition {
            name: spec.name.clone(),
            description: spec.description.clone(),
            parameters: spec.parameters.schema.clone(),
        })
    }

    /// Execute one call. Never errors to the caller: failures, including
    /// unknown names, come back inside the result.
    pub async fn execute_tool(&self, call: &ToolCall, ctx: &ToolContext) -> ToolExecutionResult {
        let Some(spec) = self.tools.get(&call.name) else {
            return ToolExecutionResult::err(
                call,
                format!(
                    "Unknown tool: {}. Available tools: {}",
                    call.name,
                    self.known_names().join(", ")
                ),
            );
        };

        debug!(tool = %call.name, call_id = %call.id, "dispatching tool");

        match spec
            .handler
            .invoke(call.arguments.clone(), ctx.clone())
            .await
        {
            Ok(value) => ToolExecutionResult::ok(call, value),
            // Consent failures are tagged so the driver can swap in an
            // auth link instead of surfacing a dead end.
            Err(e @ ValetError::AuthorizationRequired(_)) => {
                ToolExecutionResult::err(call, format!("{AUTH_REQUIRED_PREFIX} {e}"))
            }
            Err(e) => ToolExecutionResult::err(call, e.to_string()),
        }
    }

    /// Execute a batch concurrently. Returns exactly one result per call,
    /// keyed by call id; a failing sibling never affects the others.
    pub async fn execute_tools(
        &self,
        calls: &[ToolCall],
        ctx: &ToolContext,
    ) -> Vec<ToolExecutionResult> {
        join_all(calls.iter().map(|call| self.execute_tool(call, ctx))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ToolRegistry {
        let mut reg = ToolRegistry::new();
        reg.register(ToolSpec::new(
            "echo",
            "Echo arguments back",
            ToolParameters::empty(),
            Handler::params_and_ctx(|args, _ctx| async move { Ok(args) }),
        ));
        reg.register(ToolSpec::new(
            "whoami",
            "Return the caller id",
            ToolParameters::empty(),
            Handler::ctx_only(|ctx| async move { Ok(serde_json::json!({"user_id": ctx.user_id})) }),
        ));
        reg.register(ToolSpec::new(
            "fail",
            "Always fails",
            ToolParameters::empty(),
            Handler::sync(|_, _| Err(ValetError::InvalidArgument("nope".into()))),
        ));
        reg
    }

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments: serde_json::json!({"x": 1}),
        }
    }

    #[tokio::test]
    async fn each_handler_variant_dispatches() {
        let reg = registry();
        let ctx = ToolContext::new("user-1");

        let r = reg.execute_tool(&call("a", "echo"), &ctx).await;
        assert_eq!(r.outcome.to_transcript_json()["x"], 1);

        let r = reg.execute_tool(&call("b", "whoami"), &ctx).await;
        assert_eq!(r.outcome.to_transcript_json()["user_id"], "user-1");

        let r = reg.execute_tool(&call("c", "fail"), &ctx).await;
        assert!(r.is_error());
    }

    #[tokio::test]
    async fn unknown_tool_lists_known_names() {
        let reg = registry();
        let ctx = ToolContext::new("user-1");
        let r = reg.execute_tool(&call("z", "frobnicate"), &ctx).await;
        assert!(r.is_error());
        match r.outcome {
            super::super::types::ToolOutcome::Err { message } => {
                assert!(message.starts_with("Unknown tool: frobnicate"));
                assert!(message.contains("echo"));
                assert!(message.contains("whoami"));
            }
            _ => panic!("expected error outcome"),
        }
    }

    #[tokio::test]
    async fn batch_returns_one_result_per_call() {
        let reg = registry();
        let ctx = ToolContext::new("user-1");
        let calls = vec![call("1", "echo"), call("2", "fail"), call("3", "whoami")];
        let results = reg.execute_tools(&calls, &ctx).await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].call_id, "1");
        assert!(!results[0].is_error());
        assert!(results[1].is_error());
        assert!(!results[2].is_error());
    }
}
