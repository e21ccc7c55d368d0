//! Per-session conversation memory.
//!
//! Each session owns its own message log behind a dedicated mutex, so
//! appends to different sessions never contend and a user/assistant pair is
//! written atomically with respect to readers of the same session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use privlex_core::types::Message;

use crate::error::AgentError;

type SessionLog = Arc<Mutex<Vec<Message>>>;

/// In-process store of session histories, keyed by session id.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, SessionLog>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one message to a session, creating the session if needed.
    pub fn append(&self, session_id: &str, message: Message) -> Result<(), AgentError> {
        let log = self.log_for(session_id)?;
        let mut messages = lock_log(&log)?;
        messages.push(message);
        Ok(())
    }

    /// Append a user message and its assistant reply as one unit. Readers see
    /// either neither or both.
    pub fn append_turn(
        &self,
        session_id: &str,
        user: Message,
        assistant: Message,
    ) -> Result<(), AgentError> {
        let log = self.log_for(session_id)?;
        let mut messages = lock_log(&log)?;
        messages.push(user);
        messages.push(assistant);
        Ok(())
    }

    /// The last `window` messages of a session, oldest first. Unknown
    /// sessions yield an empty list.
    pub fn recent(&self, session_id: &str, window: usize) -> Result<Vec<Message>, AgentError> {
        let Some(log) = self.existing(session_id)? else {
            return Ok(Vec::new());
        };
        let messages = lock_log(&log)?;
        let start = messages.len().saturating_sub(window);
        Ok(messages[start..].to_vec())
    }

    /// The full history of a session, oldest first.
    pub fn history(&self, session_id: &str) -> Result<Vec<Message>, AgentError> {
        let Some(log) = self.existing(session_id)? else {
            return Ok(Vec::new());
        };
        let messages = lock_log(&log)?;
        Ok(messages.clone())
    }

    /// Forget a session's history. Resetting an unknown or already empty
    /// session is a no-op.
    pub fn reset(&self, session_id: &str) -> Result<(), AgentError> {
        if let Some(log) = self.existing(session_id)? {
            lock_log(&log)?.clear();
        }
        Ok(())
    }

    /// Number of sessions that currently hold at least one message.
    pub fn session_count(&self) -> Result<usize, AgentError> {
        let sessions = self
            .sessions
            .read()
            .map_err(|e| AgentError::Memory(format!("session map lock poisoned: {}", e)))?;
        let mut count = 0;
        for log in sessions.values() {
            if !lock_log(log)?.is_empty() {
                count += 1;
            }
        }
        Ok(count)
    }

    fn existing(&self, session_id: &str) -> Result<Option<SessionLog>, AgentError> {
        let sessions = self
            .sessions
            .read()
            .map_err(|e| AgentError::Memory(format!("session map lock poisoned: {}", e)))?;
        Ok(sessions.get(session_id).cloned())
    }

    fn log_for(&self, session_id: &str) -> Result<SessionLog, AgentError> {
        if let Some(log) = self.existing(session_id)? {
            return Ok(log);
        }
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| AgentError::Memory(format!("session map lock poisoned: {}", e)))?;
        Ok(sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())))
            .clone())
    }
}

fn lock_log(log: &SessionLog) -> Result<std::sync::MutexGuard<'_, Vec<Message>>, AgentError> {
    log.lock()
        .map_err(|e| AgentError::Memory(format!("session lock poisoned: {}", e)))
}
