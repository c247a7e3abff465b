//! Per-session working state: uploaded documents, the conversation and the live analysis.

use crate::schema::{AnalysisResult, DocumentText};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque session identifier supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub documents: Vec<DocumentText>,
    pub conversation: Vec<ChatMessage>,
    pub analysis: Option<AnalysisResult>,
    pub created_at: DateTime<Utc>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            documents: Vec::new(),
            conversation: Vec::new(),
            analysis: None,
            created_at: Utc::now(),
        }
    }
}

impl Session {
    /// The last `limit` conversation turns, oldest first.
    pub fn recent_history(&self, limit: usize) -> &[ChatMessage] {
        let start = self.conversation.len().saturating_sub(limit);
        &self.conversation[start..]
    }
}

/// Keyed session storage.
///
/// Implementations must be safe to share across tasks. Concurrent writers to the same
/// session are not serialized beyond the atomicity of [`SessionStore::update`].
pub trait SessionStore: Send + Sync {
    fn get(&self, id: &SessionId) -> Option<Session>;
    fn set(&self, id: &SessionId, session: Session);
    fn delete(&self, id: &SessionId) -> bool;

    /// Applies `f` to the session, creating an empty one first if needed, and returns its result.
    fn update<R>(&self, id: &SessionId, f: impl FnOnce(&mut Session) -> R) -> R
    where
        Self: Sized;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-local store. Sessions live until deleted.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<SessionId, Session>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, id: &SessionId) -> Option<Session> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    fn set(&self, id: &SessionId, session: Session) {
        self.sessions.insert(id.clone(), session);
    }

    fn delete(&self, id: &SessionId) -> bool {
        self.sessions.remove(id).is_some()
    }

    fn update<R>(&self, id: &SessionId, f: impl FnOnce(&mut Session) -> R) -> R {
        let mut entry = self.sessions.entry(id.clone()).or_default();
        f(entry.value_mut())
    }

    fn len(&self) -> usize {
        self.sessions.len()
    }
}
