//! Events and request/outcome types for a single turn.

use bon::Builder;
use serde::{Deserialize, Serialize};

/// Events surfaced to the caller while a turn runs.
///
/// Ordered per turn. Completed turns end with `Done`, failed turns end
/// with `Error`; a canceled turn's stream simply closes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Incremental assistant text.
    TextDelta { content: String },
    /// The model opened a tool call.
    ToolCallStart { id: String, name: String },
    /// A fragment of the arguments for an open tool call.
    ToolCallDelta { id: String, arguments: String },
    /// Control moved from one agent to another for a delegation.
    AgentSwitch { from: String, to: String },
    /// The turn failed; terminal.
    Error { message: String },
    /// The turn completed; terminal.
    Done,
}

/// One user turn handed to the runtime.
#[derive(Debug, Clone, Builder)]
#[builder(on(String, into))]
pub struct TurnRequest {
    pub profile_id: String,
    pub user_id: String,
    pub email: Option<String>,
    /// Optional task scope; turns sharing a task share a transcript.
    pub task_id: Option<String>,
    pub text: String,
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Completed { text: String },
    Failed { message: String },
    Canceled,
}

/// Summary of one stored transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionInfo {
    pub session_id: String,
    pub item_count: usize,
    pub needs_compaction: bool,
}
