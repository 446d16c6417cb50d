//! In-process conversation memory.
//!
//! One ordered turn sequence per session id, living as long as the hosting
//! process. The store is an explicit, injectable object rather than a
//! module-global map, so tests can use fresh instances.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::llm::types::ChatMessage;

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<HashMap<String, Vec<ChatMessage>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one turn to the session, creating the session on first use.
    /// Appends to the same session are serialized by the lock.
    pub fn add_message(&self, session_id: &str, role: &str, content: &str) {
        let mut sessions = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        sessions
            .entry(session_id.to_string())
            .or_default()
            .push(ChatMessage {
                role: role.to_string(),
                content: content.to_string(),
            });
    }

    /// Ordered snapshot of a session's turns; empty for unknown sessions.
    pub fn get_history(&self, session_id: &str) -> Vec<ChatMessage> {
        let sessions = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        sessions.get(session_id).cloned().unwrap_or_default()
    }

    pub fn message_count(&self, session_id: &str) -> usize {
        let sessions = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        sessions.get(session_id).map(|turns| turns.len()).unwrap_or(0)
    }

    /// Removes a whole session (a UI-level operation). Returns whether the
    /// session existed.
    pub fn delete_session(&self, session_id: &str) -> bool {
        let mut sessions = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        sessions.remove(session_id).is_some()
    }

    /// Session ids with their message counts, sorted by id.
    pub fn list_sessions(&self) -> Vec<(String, usize)> {
        let sessions = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut listing: Vec<(String, usize)> = sessions
            .iter()
            .map(|(id, turns)| (id.clone(), turns.len()))
            .collect();
        listing.sort();
        listing
    }
}
