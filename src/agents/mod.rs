//! Agent definitions and the bounded delegation graph.

pub mod catalog;
pub mod graph;
pub mod intent;

pub use catalog::builtin_graph;
pub use graph::AgentGraph;
pub use intent::{classify_intent, Intent};

use serde::{Deserialize, Serialize};

use crate::profile::ModelTier;

/// Maximum delegation depth from the orchestrator root.
/// Root (0) delegates to handoff agents (1), which may call atomic
/// agents (2); atomic agents never delegate.
pub const MAX_DELEGATION_DEPTH: usize = 2;

/// Reference to something an agent may call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolRef {
    /// A leaf tool in the dispatch table.
    Leaf { name: String },
    /// Another agent exposed as a callable tool.
    AgentTool { agent_id: String, tool_name: String },
}

impl ToolRef {
    pub fn leaf(name: impl Into<String>) -> Self {
        ToolRef::Leaf { name: name.into() }
    }

    pub fn agent(agent_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        ToolRef::AgentTool {
            agent_id: agent_id.into(),
            tool_name: tool_name.into(),
        }
    }

    /// Name the model sees for this entry.
    pub fn exposed_name(&self) -> &str {
        match self {
            ToolRef::Leaf { name } => name,
            ToolRef::AgentTool { tool_name, .. } => tool_name,
        }
    }
}

/// One node in the delegation graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub id: String,
    /// Human-readable name surfaced in agent-switch events.
    pub name: String,
    pub instructions: String,
    /// Description used when this agent is exposed as a tool.
    pub description: String,
    pub model_tier: ModelTier,
    pub tools: Vec<ToolRef>,
    /// When false, the model is held to one tool call per step.
    pub parallel_tool_calls: bool,
    /// When true, the model must call a tool before answering.
    pub tool_choice_required: bool,
}

impl AgentDefinition {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        instructions: impl Into<String>,
        description: impl Into<String>,
        model_tier: ModelTier,
        tools: Vec<ToolRef>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            instructions: instructions.into(),
            description: description.into(),
            model_tier,
            tools,
            parallel_tool_calls: false,
            tool_choice_required: false,
        }
    }

    pub fn with_parallel_tool_calls(mut self) -> Self {
        self.parallel_tool_calls = true;
        self
    }

    pub fn with_required_tool_choice(mut self) -> Self {
        self.tool_choice_required = true;
        self
    }

    /// The ToolRef behind an exposed tool name, if any.
    pub fn tool_ref(&self, exposed_name: &str) -> Option<&ToolRef> {
        self.tools.iter().find(|t| t.exposed_name() == exposed_name)
    }

    /// Sub-agent references only.
    pub fn agent_refs(&self) -> impl Iterator<Item = &ToolRef> {
        self.tools
            .iter()
            .filter(|t| matches!(t, ToolRef::AgentTool { .. }))
    }
}
