//! Per-user, per-agent session transcripts.
//!
//! A session id is derived deterministically from the user, agent, and
//! optional task, so every turn of the same conversation lands in the
//! same transcript without the caller carrying state. Replay filters
//! strip items that must not be fed back to a model.

pub mod backend;

pub use backend::{MemoryBackend, SessionBackend};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::types::{ModelMessage, ToolCall};

/// Item count at which a session is flagged for compaction.
pub const COMPACTION_THRESHOLD: usize = 50;

/// One entry in a session transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionItem {
    User { text: String },
    Assistant { text: String },
    ToolCall { id: String, name: String, arguments: serde_json::Value },
    ToolOutput { call_id: String, name: String, result: serde_json::Value },
    /// Provider-side reasoning. Persisted for audit, never replayed.
    Reasoning { text: String },
}

impl SessionItem {
    pub fn user(text: impl Into<String>) -> Self {
        SessionItem::User { text: text.into() }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        SessionItem::Assistant { text: text.into() }
    }

    pub fn tool_call(call: &ToolCall) -> Self {
        SessionItem::ToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        }
    }

    pub fn tool_output(
        call_id: impl Into<String>,
        name: impl Into<String>,
        result: serde_json::Value,
    ) -> Self {
        SessionItem::ToolOutput {
            call_id: call_id.into(),
            name: name.into(),
            result,
        }
    }
}

/// Derive the stable session id for a (user, agent, task) triple.
pub fn derive_session_id(user_id: &str, agent_name: &str, task_id: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(agent_name.as_bytes());
    if let Some(task) = task_id {
        hasher.update(b"\x1f");
        hasher.update(task.as_bytes());
    }
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(12).map(|b| format!("{b:02x}")).collect();
    format!("sess-{hex}")
}

/// Drop items that must not be replayed to a model.
///
/// Reasoning is provider-internal; prior Assistant turns are rebuilt
/// from tool outputs instead of echoed verbatim. Idempotent: filtering
/// an already-filtered list is a no-op.
pub fn filter_for_replay(items: &[SessionItem]) -> Vec<SessionItem> {
    items
        .iter()
        .filter(|item| {
            !matches!(
                item,
                SessionItem::Reasoning { .. } | SessionItem::Assistant { .. }
            )
        })
        .cloned()
        .collect()
}

/// Convert filtered transcript items into replayable model messages.
pub fn replay_messages(items: &[SessionItem]) -> Vec<ModelMessage> {
    filter_for_replay(items)
        .into_iter()
        .filter_map(|item| match item {
            SessionItem::User { text } => Some(ModelMessage::user(text)),
            SessionItem::ToolCall { id, name, arguments } => Some(
                ModelMessage::assistant_with_calls("", vec![ToolCall { id, name, arguments }]),
            ),
            SessionItem::ToolOutput { call_id, result, .. } => {
                Some(ModelMessage::tool_output(call_id, result, false))
            }
            _ => None,
        })
        .collect()
}

/// A handle to one transcript, caching reads in-process.
#[derive(Clone)]
pub struct Session {
    backend: Arc<dyn SessionBackend>,
    session_id: String,
    cache: Arc<Mutex<Option<Vec<SessionItem>>>>,
}

impl Session {
    pub fn new(backend: Arc<dyn SessionBackend>, user_id: &str, agent_name: &str, task_id: Option<&str>) -> Self {
        Self {
            backend,
            session_id: derive_session_id(user_id, agent_name, task_id),
            cache: Arc::new(Mutex::new(None)),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Read the replayable transcript: reasoning and assistant items
    /// are stripped on every load, cache hits included. `limit` keeps
    /// only the newest items after filtering.
    pub async fn get_items(&self, limit: Option<usize>) -> Vec<SessionItem> {
        let mut items = filter_for_replay(&self.load().await);
        if let Some(limit) = limit {
            let excess = items.len().saturating_sub(limit);
            items.drain(..excess);
        }
        items
    }

    /// Full stored transcript. A backend read failure degrades to an
    /// empty list so a turn can still run; the failure is logged.
    async fn load(&self) -> Vec<SessionItem> {
        let mut cache = self.cache.lock().await;
        if let Some(items) = cache.as_ref() {
            return items.clone();
        }
        match self.backend.get(&self.session_id).await {
            Ok(items) => {
                let items = items.unwrap_or_default();
                *cache = Some(items.clone());
                items
            }
            Err(err) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    error = %err,
                    "session read failed, continuing with empty transcript"
                );
                Vec::new()
            }
        }
    }

    /// Append items. Write failures propagate so a turn's persistence
    /// cannot silently vanish; the cache is only updated on success.
    pub async fn add_items(&self, new_items: Vec<SessionItem>) -> Result<()> {
        if new_items.is_empty() {
            return Ok(());
        }
        let mut cache = self.cache.lock().await;
        let mut items = match cache.take() {
            Some(items) => items,
            None => self
                .backend
                .get(&self.session_id)
                .await?
                .unwrap_or_default(),
        };
        items.extend(new_items);
        self.backend.put(&self.session_id, items.clone()).await?;
        *cache = Some(items);
        Ok(())
    }

    /// Remove and return the most recent item.
    pub async fn pop_item(&self) -> Result<Option<SessionItem>> {
        let mut cache = self.cache.lock().await;
        let mut items = match cache.take() {
            Some(items) => items,
            None => self
                .backend
                .get(&self.session_id)
                .await?
                .unwrap_or_default(),
        };
        let popped = items.pop();
        if popped.is_some() {
            self.backend.put(&self.session_id, items.clone()).await?;
        }
        *cache = Some(items);
        Ok(popped)
    }

    pub async fn clear(&self) -> Result<()> {
        self.backend.delete(&self.session_id).await?;
        *self.cache.lock().await = Some(Vec::new());
        Ok(())
    }

    /// Whether the transcript has grown past [`COMPACTION_THRESHOLD`].
    pub async fn needs_compaction(&self) -> bool {
        self.get_items(None).await.len() >= COMPACTION_THRESHOLD
    }
}
