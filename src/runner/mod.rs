//! The execution driver: streams the root agent, dispatches tools,
//! delegates to sub-agents, and persists the transcript.

pub mod events;

pub use events::{SessionInfo, StreamEvent, TurnOutcome, TurnRequest};

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::agents::intent::{classify_intent, highest_priority_agent};
use crate::agents::{builtin_graph, AgentDefinition, AgentGraph, ToolRef};
use crate::config::ValetConfig;
use crate::error::{Result, ValetError};
use crate::profile::{
    get_agent_profile, get_model_spec, get_model_spec_for_tier, AgentProfile, ModelSpec,
};
use crate::provider::{create_provider, ChatRequest, ModelProvider, ToolDefinition};
use crate::session::{
    replay_messages, MemoryBackend, Session, SessionBackend, SessionItem, COMPACTION_THRESHOLD,
};
use crate::tools::{
    builtin_registry, Services, ToolContext, ToolExecutionResult, ToolOutcome, ToolRegistry,
};
use crate::types::{
    GenerationSettings, ModelMessage, StreamChunk, ToolCall, ToolChoice,
};

/// Hard cap on model/tool round trips within one agent.
pub const MAX_TOOL_ITERATIONS: usize = 10;

/// Seam for swapping provider construction, used by tests to script
/// model behavior without a network.
pub type ProviderFactory =
    Arc<dyn Fn(&ModelSpec, &ValetConfig) -> Result<Box<dyn ModelProvider>> + Send + Sync>;

#[derive(Clone)]
struct RuntimeInner {
    config: ValetConfig,
    graph: AgentGraph,
    registry: ToolRegistry,
    backend: Arc<dyn SessionBackend>,
    provider_factory: ProviderFactory,
}

/// The assembled runtime: graph + tools + sessions + providers.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Build a runtime over the built-in graph and tool set.
    pub fn new(config: ValetConfig, services: Services) -> Result<Self> {
        let graph = builtin_graph()?;
        let registry = builtin_registry(services, config.clone());
        Ok(Self {
            inner: Arc::new(RuntimeInner {
                config,
                graph,
                registry,
                backend: Arc::new(MemoryBackend::new()),
                provider_factory: Arc::new(|spec, config| create_provider(spec, config)),
            }),
        })
    }

    /// Replace the session backend.
    pub fn with_session_backend(self, backend: Arc<dyn SessionBackend>) -> Self {
        let mut inner = (*self.inner).clone();
        inner.backend = backend;
        Self { inner: Arc::new(inner) }
    }

    /// Replace provider construction.
    pub fn with_provider_factory(self, factory: ProviderFactory) -> Self {
        let mut inner = (*self.inner).clone();
        inner.provider_factory = factory;
        Self { inner: Arc::new(inner) }
    }

    /// Replace the agent graph.
    pub fn with_graph(self, graph: AgentGraph) -> Self {
        let mut inner = (*self.inner).clone();
        inner.graph = graph;
        Self { inner: Arc::new(inner) }
    }

    fn session(&self, user_id: &str, task_id: Option<&str>) -> Session {
        Session::new(
            self.inner.backend.clone(),
            user_id,
            &self.inner.graph.root().name,
            task_id,
        )
    }

    /// Summary of the transcript a (user, task) pair maps to.
    pub async fn get_session_info(&self, user_id: &str, task_id: Option<&str>) -> SessionInfo {
        let session = self.session(user_id, task_id);
        let items = session.get_items(None).await;
        SessionInfo {
            session_id: session.session_id().to_string(),
            item_count: items.len(),
            needs_compaction: items.len() >= COMPACTION_THRESHOLD,
        }
    }

    /// Drop the transcript for a (user, task) pair.
    pub async fn clear_session(&self, user_id: &str, task_id: Option<&str>) -> Result<()> {
        self.session(user_id, task_id).clear().await
    }

    /// Start a turn. Events stream through the returned handle; the
    /// outcome is available from [`TurnHandle::wait`].
    pub fn run_agent_turn(&self, request: TurnRequest) -> TurnHandle {
        let (event_tx, event_rx) = mpsc::channel(64);
        let (abort_tx, abort_rx) = oneshot::channel::<()>();
        let inner = self.inner.clone();

        let join = tokio::spawn(async move {
            tokio::select! {
                outcome = drive_turn(inner, request, event_tx.clone()) => {
                    // Failed turns already ended with a terminal Error
                    // event.
                    if !matches!(outcome, TurnOutcome::Failed { .. }) {
                        let _ = event_tx.send(StreamEvent::Done).await;
                    }
                    outcome
                }
                // A dropped handle disables this arm; only an explicit
                // abort() cancels the turn.
                Ok(()) = abort_rx => {
                    debug!("turn aborted before completion");
                    TurnOutcome::Canceled
                }
            }
        });

        TurnHandle {
            events: event_rx,
            abort: Some(abort_tx),
            join,
        }
    }
}

/// Handle to a running turn.
pub struct TurnHandle {
    events: mpsc::Receiver<StreamEvent>,
    abort: Option<oneshot::Sender<()>>,
    join: JoinHandle<TurnOutcome>,
}

impl TurnHandle {
    /// Next event, or `None` once the stream is closed.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    /// Consume the handle's receiver as a `Stream` of events.
    ///
    /// Dropping the handle also drops the abort channel, so the turn keeps
    /// running to completion once converted.
    pub fn into_event_stream(self) -> tokio_stream::wrappers::ReceiverStream<StreamEvent> {
        tokio_stream::wrappers::ReceiverStream::new(self.events)
    }

    /// Cancel the turn. Nothing from a canceled turn is persisted.
    pub fn abort(&mut self) {
        if let Some(tx) = self.abort.take() {
            let _ = tx.send(());
        }
    }

    /// Wait for the turn to finish.
    pub async fn wait(self) -> TurnOutcome {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(_) => TurnOutcome::Failed {
                message: "turn task panicked".to_string(),
            },
        }
    }
}

async fn drive_turn(
    inner: Arc<RuntimeInner>,
    request: TurnRequest,
    tx: mpsc::Sender<StreamEvent>,
) -> TurnOutcome {
    match run_root(&inner, &request, &tx).await {
        Ok(text) => TurnOutcome::Completed { text },
        Err(err) => {
            warn!(error = %err, "turn failed");
            let _ = tx
                .send(StreamEvent::Error {
                    message: err.to_string(),
                })
                .await;
            TurnOutcome::Failed {
                message: err.to_string(),
            }
        }
    }
}

/// Drive the orchestrator: stream model output, run tools, loop until a
/// final answer, then persist the turn.
async fn run_root(
    inner: &RuntimeInner,
    request: &TurnRequest,
    tx: &mpsc::Sender<StreamEvent>,
) -> Result<String> {
    let profile = get_agent_profile(&request.profile_id);
    let root = inner.graph.root().clone();
    let spec = get_model_spec(profile);
    let provider = (inner.provider_factory)(&spec, &inner.config)?;

    let ctx = tool_context(request);
    let session = Session::new(
        inner.backend.clone(),
        &request.user_id,
        &root.name,
        request.task_id.as_deref(),
    );
    let history = replay_messages(&session.get_items(None).await);

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ModelMessage::system(system_prompt(&root, profile)));
    messages.extend(history);
    messages.push(ModelMessage::user(request.text.clone()));

    let tools = tool_definitions(inner, &root)?;
    let mut persisted: Vec<SessionItem> = vec![SessionItem::user(&request.text)];
    let mut delegated_this_turn = false;
    let mut last_structured: Option<serde_json::Value> = None;
    let mut final_text = String::new();

    for iteration in 0..MAX_TOOL_ITERATIONS {
        let chat = ChatRequest {
            messages: messages.clone(),
            settings: settings_for(&spec, &root, iteration),
            tools: Some(tools.clone()),
        };
        let (text, mut calls) = stream_step(provider.as_ref(), &chat, tx).await?;

        // A root model that answers without routing still owes the turn
        // its one delegation; classification picks the handoff.
        if calls.is_empty() && !delegated_this_turn {
            if let Some(forced) = forced_delegation(&root, &request.text) {
                calls.push(forced);
            }
        }

        if calls.is_empty() {
            final_text = text;
            break;
        }

        messages.push(ModelMessage::assistant_with_calls(text, calls.clone()));
        for call in &calls {
            persisted.push(SessionItem::tool_call(call));
        }

        let results = execute_agent_calls(
            inner,
            &root,
            profile,
            &ctx,
            &request.text,
            &calls,
            0,
            true,
            &mut delegated_this_turn,
            tx,
        )
        .await?;

        for result in &results {
            let json = result.outcome.to_transcript_json();
            if !result.is_error() {
                last_structured = Some(json.clone());
            }
            persisted.push(SessionItem::tool_output(
                result.call_id.as_str(),
                result.name.as_str(),
                json.clone(),
            ));
            messages.push(ModelMessage::tool_output(
                result.call_id.as_str(),
                json,
                result.is_error(),
            ));
        }
    }

    // A turn that ends on a structured output still owes the caller text.
    if final_text.is_empty() {
        if let Some(value) = last_structured {
            final_text = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            let _ = tx
                .send(StreamEvent::TextDelta {
                    content: final_text.clone(),
                })
                .await;
        }
    }

    persisted.push(SessionItem::assistant(&final_text));
    session.add_items(persisted).await?;
    Ok(final_text)
}

/// Collect one streamed model step into its text and tool calls,
/// forwarding deltas to the caller as they arrive.
async fn stream_step(
    provider: &dyn ModelProvider,
    request: &ChatRequest,
    tx: &mpsc::Sender<StreamEvent>,
) -> Result<(String, Vec<ToolCall>)> {
    let mut stream = provider.stream(request).await?;
    let mut text = String::new();
    // (id, name, argument buffer), in arrival order.
    let mut open: Vec<(String, String, String)> = Vec::new();

    while let Some(chunk) = stream.next().await {
        match chunk? {
            StreamChunk::TextDelta { text: delta } => {
                text.push_str(&delta);
                let _ = tx.send(StreamEvent::TextDelta { content: delta }).await;
            }
            StreamChunk::ToolCallStart { id, name } => {
                let _ = tx
                    .send(StreamEvent::ToolCallStart {
                        id: id.clone(),
                        name: name.clone(),
                    })
                    .await;
                open.push((id, name, String::new()));
            }
            StreamChunk::ToolCallDelta { id, arguments } => {
                let _ = tx
                    .send(StreamEvent::ToolCallDelta {
                        id: id.clone(),
                        arguments: arguments.clone(),
                    })
                    .await;
                if let Some(entry) = open.iter_mut().find(|(open_id, ..)| *open_id == id) {
                    entry.2.push_str(&arguments);
                }
            }
            StreamChunk::Done { .. } => {}
        }
    }

    let calls = open
        .into_iter()
        .map(|(id, name, buffer)| {
            let arguments = if buffer.trim().is_empty() {
                serde_json::json!({})
            } else {
                serde_json::from_str(&buffer)
                    .unwrap_or_else(|_| serde_json::json!({ "raw": buffer }))
            };
            ToolCall { id, name, arguments }
        })
        .collect();

    Ok((text, calls))
}

/// Execute one batch of tool calls for an agent.
///
/// Leaf calls fan out concurrently. Delegations run sequentially; when
/// `enforce_single_delegation` is set (the orchestrator), at most one
/// delegation executes per turn and the rest come back as errors the
/// model can read.
#[allow(clippy::too_many_arguments)]
async fn execute_agent_calls(
    inner: &RuntimeInner,
    agent: &AgentDefinition,
    profile: &AgentProfile,
    ctx: &ToolContext,
    fallback_input: &str,
    calls: &[ToolCall],
    depth: usize,
    enforce_single_delegation: bool,
    delegated_this_turn: &mut bool,
    tx: &mpsc::Sender<StreamEvent>,
) -> Result<Vec<ToolExecutionResult>> {
    let mut slots: Vec<Option<ToolExecutionResult>> = vec![None; calls.len()];
    let mut leaf_indices = Vec::new();
    let mut leaf_calls = Vec::new();
    let mut delegations: Vec<(usize, String)> = Vec::new();

    for (idx, call) in calls.iter().enumerate() {
        match agent.tool_ref(&call.name) {
            Some(ToolRef::AgentTool { agent_id, .. }) => {
                delegations.push((idx, agent_id.clone()));
            }
            // Unknown names go through the registry so the model gets
            // the known-tool listing back.
            Some(ToolRef::Leaf { .. }) | None => {
                leaf_indices.push(idx);
                leaf_calls.push(call.clone());
            }
        }
    }

    let leaf_results = run_leaf_calls(inner, ctx, &leaf_calls).await;
    for (idx, result) in leaf_indices.into_iter().zip(leaf_results) {
        slots[idx] = Some(result);
    }

    if !delegations.is_empty() {
        let selected: Vec<usize> = if !enforce_single_delegation {
            delegations.iter().map(|(idx, _)| *idx).collect()
        } else if *delegated_this_turn {
            Vec::new()
        } else {
            let chosen = highest_priority_agent(delegations.iter().map(|(_, id)| id.as_str()))
                .map(str::to_string);
            let idx = chosen
                .and_then(|id| {
                    delegations
                        .iter()
                        .find(|(_, agent_id)| *agent_id == id)
                        .map(|(idx, _)| *idx)
                })
                .unwrap_or(delegations[0].0);
            vec![idx]
        };

        for (idx, agent_id) in &delegations {
            let call = &calls[*idx];
            if !selected.contains(idx) {
                slots[*idx] = Some(ToolExecutionResult::err(
                    call,
                    "delegation not executed: one delegation runs per turn and another was selected",
                ));
                continue;
            }

            let sub = inner
                .graph
                .agent(agent_id)
                .ok_or_else(|| ValetError::Graph(format!("unknown agent '{agent_id}'")))?
                .clone();
            let input = delegation_input(&call.arguments, fallback_input);

            let _ = tx
                .send(StreamEvent::AgentSwitch {
                    from: agent.name.clone(),
                    to: sub.name.clone(),
                })
                .await;
            if enforce_single_delegation {
                *delegated_this_turn = true;
            }

            slots[*idx] = Some(
                match run_sub_agent(
                    inner,
                    sub,
                    profile.clone(),
                    ctx.clone(),
                    input,
                    depth + 1,
                    tx.clone(),
                )
                .await
                {
                    Ok(value) => ToolExecutionResult::ok(call, value),
                    Err(err) => ToolExecutionResult::err(call, err.to_string()),
                },
            );
        }
    }

    Ok(slots
        .into_iter()
        .zip(calls)
        .map(|(slot, call)| {
            slot.unwrap_or_else(|| ToolExecutionResult::err(call, "tool did not execute"))
        })
        .collect())
}

/// Run leaf calls concurrently, then apply the two recovery edges:
/// one default-fill retry for missing required fields, and the consent
/// link swap for authorization failures.
async fn run_leaf_calls(
    inner: &RuntimeInner,
    ctx: &ToolContext,
    calls: &[ToolCall],
) -> Vec<ToolExecutionResult> {
    let mut results = inner.registry.execute_tools(calls, ctx).await;

    for (call, result) in calls.iter().zip(results.iter_mut()) {
        if let ToolOutcome::Err { message } = &result.outcome {
            if message.contains("Missing required field") {
                let retry = ToolCall {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: fill_defaults(&call.arguments, ctx),
                };
                debug!(tool = %call.name, "retrying with default fields");
                let second = inner.registry.execute_tool(&retry, ctx).await;
                if !second.is_error() {
                    *result = second;
                    continue;
                }
            }
        }

        if result.needs_authorization() {
            let auth_call = ToolCall {
                id: call.id.clone(),
                name: "generate_auth_url".to_string(),
                arguments: serde_json::json!({}),
            };
            let auth = inner.registry.execute_tool(&auth_call, ctx).await;
            if let ToolOutcome::Ok { value } = auth.outcome {
                *result = ToolExecutionResult::ok(
                    call,
                    serde_json::json!({
                        "authorization_required": true,
                        "auth": value,
                    }),
                );
            }
        }
    }

    results
}

/// Fill the documented defaults for a creation call that failed on a
/// missing required field. Applied at most once per call.
fn fill_defaults(args: &serde_json::Value, ctx: &ToolContext) -> serde_json::Value {
    let mut filled = args.clone();
    if let Some(map) = filled.as_object_mut() {
        map.entry("summary")
            .or_insert_with(|| serde_json::Value::String("Untitled event".to_string()));
        map.entry("start")
            .or_insert_with(|| serde_json::Value::String(chrono::Utc::now().to_rfc3339()));
        if let Some(tz) = &ctx.timezone {
            map.entry("timezone")
                .or_insert_with(|| serde_json::Value::String(tz.clone()));
        }
    }
    filled
}

/// Synthesize the handoff call for a root step that proposed no
/// delegation. Requests matching no intent, and intents the root has
/// no handoff for, are left alone.
fn forced_delegation(root: &AgentDefinition, text: &str) -> Option<ToolCall> {
    let agent_id = classify_intent(text)?.handoff_agent_id();
    let tool_name = root.tools.iter().find_map(|tool| match tool {
        ToolRef::AgentTool { agent_id: id, tool_name } if id == agent_id => {
            Some(tool_name.clone())
        }
        _ => None,
    })?;
    debug!(agent_id, "routing undelegated turn by classified intent");
    Some(ToolCall {
        id: uuid::Uuid::new_v4().to_string(),
        name: tool_name,
        arguments: serde_json::json!({ "input": text }),
    })
}

fn delegation_input(args: &serde_json::Value, fallback: &str) -> String {
    if let Some(input) = args.get("input").and_then(|v| v.as_str()) {
        return input.to_string();
    }
    match args.as_object() {
        Some(map) if !map.is_empty() => args.to_string(),
        _ => fallback.to_string(),
    }
}

/// Run a sub-agent to completion with a non-streaming loop. Returns the
/// agent's final text, or its last structured output when it finishes
/// silent.
fn run_sub_agent<'a>(
    inner: &'a RuntimeInner,
    agent: AgentDefinition,
    profile: AgentProfile,
    ctx: ToolContext,
    input: String,
    depth: usize,
    tx: mpsc::Sender<StreamEvent>,
) -> BoxFuture<'a, Result<serde_json::Value>> {
    async move {
        let spec = get_model_spec_for_tier(&profile, agent.model_tier);
        let provider = (inner.provider_factory)(&spec, &inner.config)?;
        let tools = tool_definitions(inner, &agent)?;

        let mut messages = vec![
            ModelMessage::system(agent.instructions.clone()),
            ModelMessage::user(input.clone()),
        ];
        let mut last_structured: Option<serde_json::Value> = None;
        let mut delegated = false;

        for iteration in 0..MAX_TOOL_ITERATIONS {
            let chat = ChatRequest {
                messages: messages.clone(),
                settings: settings_for(&spec, &agent, iteration),
                tools: if tools.is_empty() {
                    None
                } else {
                    Some(tools.clone())
                },
            };
            let response = provider.chat(&chat).await?;

            if response.tool_calls.is_empty() {
                if !response.text.is_empty() {
                    return Ok(serde_json::Value::String(response.text));
                }
                return Ok(last_structured.unwrap_or(serde_json::Value::Null));
            }

            messages.push(ModelMessage::assistant_with_calls(
                response.text,
                response.tool_calls.clone(),
            ));

            let results = execute_agent_calls(
                inner,
                &agent,
                &profile,
                &ctx,
                &input,
                &response.tool_calls,
                depth,
                false,
                &mut delegated,
                &tx,
            )
            .await?;

            for result in &results {
                let json = result.outcome.to_transcript_json();
                if !result.is_error() {
                    last_structured = Some(json.clone());
                }
                messages.push(ModelMessage::tool_output(
                    result.call_id.as_str(),
                    json,
                    result.is_error(),
                ));
            }
        }

        warn!(agent = %agent.id, "tool iteration limit reached");
        Ok(last_structured.unwrap_or(serde_json::Value::Null))
    }
    .boxed()
}

fn settings_for(
    spec: &ModelSpec,
    agent: &AgentDefinition,
    iteration: usize,
) -> GenerationSettings {
    // Required tool choice applies to the first step only, otherwise a
    // tool-bound agent can never produce its final answer.
    let tool_choice = if agent.tool_choice_required && iteration == 0 {
        Some(ToolChoice::Required)
    } else {
        None
    };
    GenerationSettings {
        max_tokens: Some(spec.max_tokens),
        temperature: Some(spec.temperature),
        parallel_tool_calls: Some(agent.parallel_tool_calls),
        tool_choice,
        ..Default::default()
    }
}

fn system_prompt(agent: &AgentDefinition, profile: &AgentProfile) -> String {
    format!(
        "{}\n\nStyle: {}",
        agent.instructions, profile.personality.notes
    )
}

fn tool_context(request: &TurnRequest) -> ToolContext {
    let mut ctx = ToolContext::new(request.user_id.clone());
    if let Some(email) = &request.email {
        ctx = ctx.with_email(email.clone());
    }
    ctx
}

/// Wire definitions for everything an agent may call: leaf tools come
/// from the registry, sub-agents are exposed as a single-`input` tool.
fn tool_definitions(inner: &RuntimeInner, agent: &AgentDefinition) -> Result<Vec<ToolDefinition>> {
    agent
        .tools
        .iter()
        .map(|tool| match tool {
            ToolRef::Leaf { name } => inner.registry.definition(name).ok_or_else(|| {
                ValetError::Graph(format!(
                    "agent '{}' references unknown tool '{name}'",
                    agent.id
                ))
            }),
            ToolRef::AgentTool { agent_id, tool_name } => {
                let sub = inner
                    .graph
                    .agent(agent_id)
                    .ok_or_else(|| ValetError::Graph(format!("unknown agent '{agent_id}'")))?;
                Ok(ToolDefinition {
                    name: tool_name.clone(),
                    description: sub.description.clone(),
                    parameters: serde_json::json!({
                        "type": "object",
                        "properties": {
                            "input": {
                                "type": "string",
                                "description": "The request to hand to this agent, in plain language.",
                            },
                        },
                        "required": ["input"],
                    }),
                })
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delegation_input_prefers_the_input_field() {
        let args = serde_json::json!({"input": "book lunch at noon"});
        assert_eq!(delegation_input(&args, "fallback"), "book lunch at noon");

        let args = serde_json::json!({});
        assert_eq!(delegation_input(&args, "fallback"), "fallback");

        let args = serde_json::json!({"summary": "Lunch"});
        assert_eq!(delegation_input(&args, "fallback"), r#"{"summary":"Lunch"}"#);
    }

    #[test]
    fn default_fill_only_adds_missing_fields() {
        let ctx = ToolContext::new("u1").with_timezone("America/New_York");
        let args = serde_json::json!({"summary": "Standup", "start": "2026-03-01T09:00:00Z"});
        let filled = fill_defaults(&args, &ctx);
        assert_eq!(filled["summary"], "Standup");
        assert_eq!(filled["timezone"], "America/New_York");

        let filled = fill_defaults(&serde_json::json!({}), &ctx);
        assert_eq!(filled["summary"], "Untitled event");
        assert!(filled["start"].is_string());
    }

    #[test]
    fn required_tool_choice_relaxes_after_first_step() {
        let spec = get_model_spec_for_tier(
            get_agent_profile("ally-lite"),
            crate::profile::ModelTier::Fast,
        );
        let agent = AgentDefinition::new(
            "a",
            "A",
            "instructions",
            "description",
            crate::profile::ModelTier::Fast,
            vec![],
        )
        .with_required_tool_choice();

        assert_eq!(
            settings_for(&spec, &agent, 0).tool_choice,
            Some(ToolChoice::Required)
        );
        assert_eq!(settings_for(&spec, &agent, 1).tool_choice, None);
    }
}
