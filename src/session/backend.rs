//! Pluggable session persistence.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{Result, ValetError};

use super::SessionItem;

/// Storage for per-session transcripts, keyed by session id.
///
/// Implementations are free to be eventually consistent; the store layers
/// a cache on top and treats the backend as the source of truth only on
/// cold reads.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn get(&self, session_id: &str) -> Result<Option<Vec<SessionItem>>>;
    async fn put(&self, session_id: &str, items: Vec<SessionItem>) -> Result<()>;
    async fn delete(&self, session_id: &str) -> Result<()>;
}

/// In-process backend for tests and single-node runs.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    sessions: RwLock<HashMap<String, Vec<SessionItem>>>,
    fail_reads: RwLock<bool>,
    fail_writes: RwLock<bool>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent reads fail. Test hook.
    pub fn fail_reads(&self, fail: bool) {
        *self.fail_reads.write().unwrap_or_else(|e| e.into_inner()) = fail;
    }

    /// Make subsequent writes fail. Test hook.
    pub fn fail_writes(&self, fail: bool) {
        *self.fail_writes.write().unwrap_or_else(|e| e.into_inner()) = fail;
    }
}

#[async_trait]
impl SessionBackend for MemoryBackend {
    async fn get(&self, session_id: &str) -> Result<Option<Vec<SessionItem>>> {
        if *self.fail_reads.read().unwrap_or_else(|e| e.into_inner()) {
            return Err(ValetError::Session("backend read failed".into()));
        }
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        Ok(sessions.get(session_id).cloned())
    }

    async fn put(&self, session_id: &str, items: Vec<SessionItem>) -> Result<()> {
        if *self.fail_writes.read().unwrap_or_else(|e| e.into_inner()) {
            return Err(ValetError::Session("backend write failed".into()));
        }
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.insert(session_id.to_string(), items);
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.remove(session_id);
        Ok(())
    }
}
