//! Session persistence
//!
//! Durable log of sessions, messages and document references keyed by
//! (user_id, session_id). The in-memory store serves development and
//! tests; `PostgresSessionStore` is the production backend.

use crate::error::OrchestrationError;
use crate::models::{DocumentRef, Message, Session, SessionKey, SessionSummary};
use crate::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Trait for session persistence
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session. `history_limit` bounds how many of the most recent
    /// messages are returned; `None` returns the whole log.
    async fn load_session(
        &self,
        key: &SessionKey,
        history_limit: Option<usize>,
    ) -> Result<Option<Session>>;

    /// Insert a session if none exists for its key.
    async fn create_session(&self, session: &Session) -> Result<()>;

    /// Append messages in order, atomically, and bump `last_active`.
    async fn append_messages(&self, key: &SessionKey, messages: &[Message]) -> Result<()>;

    async fn upsert_document(&self, key: &SessionKey, document: &DocumentRef) -> Result<()>;

    async fn set_language(&self, key: &SessionKey, language: &str, pinned: bool) -> Result<()>;

    /// Sessions of one user, most recently active first.
    async fn list_sessions(&self, user_id: &str) -> Result<Vec<SessionSummary>>;
}

pub(super) fn missing_session(key: &SessionKey) -> OrchestrationError {
    OrchestrationError::StateError(format!("Session {} does not exist", key))
}

/// In-memory session store for development
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<SessionKey, Session>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load_session(
        &self,
        key: &SessionKey,
        history_limit: Option<usize>,
    ) -> Result<Option<Session>> {
        let sessions = self.sessions.read().await;
        let Some(stored) = sessions.get(key) else {
            return Ok(None);
        };

        let mut session = stored.clone();
        if let Some(limit) = history_limit {
            let start = session.messages.len().saturating_sub(limit);
            session.messages.drain(..start);
        }
        Ok(Some(session))
    }

    async fn create_session(&self, session: &Session) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session.key.clone())
            .or_insert_with(|| session.clone());
        Ok(())
    }

    async fn append_messages(&self, key: &SessionKey, messages: &[Message]) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(key).ok_or_else(|| missing_session(key))?;

        session.messages.extend_from_slice(messages);
        session.message_count = session.messages.len();
        session.last_active = Utc::now();
        Ok(())
    }

    async fn upsert_document(&self, key: &SessionKey, document: &DocumentRef) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(key).ok_or_else(|| missing_session(key))?;

        match session
            .documents
            .iter_mut()
            .find(|d| d.ref_id == document.ref_id)
        {
            Some(existing) => *existing = document.clone(),
            None => session.documents.push(document.clone()),
        }
        session.last_active = Utc::now();
        Ok(())
    }

    async fn set_language(&self, key: &SessionKey, language: &str, pinned: bool) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(key).ok_or_else(|| missing_session(key))?;

        session.language = Some(language.to_string());
        session.language_pinned = pinned;
        Ok(())
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<SessionSummary>> {
        let sessions = self.sessions.read().await;

        let mut summaries: Vec<SessionSummary> = sessions
            .values()
            .filter(|s| s.key.user_id == user_id)
            .map(|s| SessionSummary {
                key: s.key.clone(),
                created_at: s.created_at,
                last_active: s.last_active,
                message_count: s.message_count,
                language: s.language.clone(),
            })
            .collect();

        summaries.sort_by(|a, b| b.last_active.cmp(&a.last_active));
        Ok(summaries)
    }
}
