//! Streaming types emitted by provider adapters.

use serde::{Deserialize, Serialize};

use super::generation::{FinishReason, Usage};

/// An incremental chunk from a provider stream.
///
/// Every provider converts its native wire events into this union before
/// the chunk leaves the adapter. Chunks for one call arrive in order;
/// `Done` is always last.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    /// Incremental assistant text.
    TextDelta { text: String },
    /// A tool call has been opened; arguments follow as deltas.
    ToolCallStart { id: String, name: String },
    /// A fragment of the JSON arguments for an open tool call.
    ToolCallDelta { id: String, arguments: String },
    /// Terminal chunk with the normalized finish reason.
    Done {
        finish_reason: FinishReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
}

impl StreamChunk {
    pub fn is_done(&self) -> bool {
        matches!(self, StreamChunk::Done { .. })
    }
}
