//! Core shared types.

pub mod generation;
pub mod message;
pub mod stream;

pub use generation::{FinishReason, GenerationSettings, ToolChoice, Usage};
pub use message::{ContentPart, ModelMessage, Role, ToolCall, ToolOutput};
pub use stream::StreamChunk;
