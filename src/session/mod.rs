//! Session context management
//!
//! Owns the per-(user, session) conversation log and document registry.
//! All mutation goes through this manager so that:
//! - appends to one session never interleave (`ConcurrencyConflict`)
//! - the orchestrator can hold a per-session turn lock while it reads
//!   history and documents

pub mod postgres;
pub mod store;

pub use postgres::PostgresSessionStore;
pub use store::{InMemorySessionStore, SessionStore};

use crate::error::OrchestrationError;
use crate::models::{
    DocumentRef, ExtractionStatus, Message, Role, Session, SessionKey, SessionSummary,
};
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

/// Held for the duration of one orchestrator run on a session.
pub type TurnGuard = OwnedMutexGuard<()>;

#[derive(Default)]
struct SessionGate {
    turn: Arc<Mutex<()>>,
    append: Mutex<()>,
}

impl SessionGate {
    /// Turn guards and waiters hold clones of `turn`; appends hold the gate.
    fn in_use(self: &Arc<Self>) -> bool {
        Arc::strong_count(self) > 1 || Arc::strong_count(&self.turn) > 1
    }
}

pub struct SessionContextManager {
    store: Arc<dyn SessionStore>,
    gates: Mutex<HashMap<SessionKey, Arc<SessionGate>>>,
    history_window: usize,
}

impl SessionContextManager {
    pub fn new(store: Arc<dyn SessionStore>, history_window: usize) -> Self {
        Self {
            store,
            gates: Mutex::new(HashMap::new()),
            history_window,
        }
    }

    /// Gate for `key`. Gates nobody holds or waits on are dropped here, so
    /// the map only tracks sessions with work in flight.
    async fn gate(&self, key: &SessionKey) -> Arc<SessionGate> {
        let mut gates = self.gates.lock().await;
        gates.retain(|k, gate| k == key || gate.in_use());
        gates.entry(key.clone()).or_default().clone()
    }

    /// Wait for exclusive use of the session for one turn.
    pub async fn lock_session(&self, key: &SessionKey) -> TurnGuard {
        let gate = self.gate(key).await;
        gate.turn.clone().lock_owned().await
    }

    /// Load the session with its recent history window, creating it if absent.
    pub async fn load_context(&self, key: &SessionKey) -> Result<Session> {
        if let Some(session) = self
            .store
            .load_session(key, Some(self.history_window))
            .await?
        {
            return Ok(session);
        }

        let session = Session::new(key.clone());
        self.store.create_session(&session).await?;
        info!(session = %key, "Session created");
        Ok(session)
    }

    /// Append one message. Fails with `ConcurrencyConflict` while another
    /// append for the same session is in flight.
    pub async fn append_turn(&self, key: &SessionKey, message: Message) -> Result<()> {
        self.append(key, vec![message]).await
    }

    /// Append a user message and its reply as one atomic write.
    pub async fn commit_turn(
        &self,
        key: &SessionKey,
        user_message: Message,
        assistant_message: Message,
    ) -> Result<()> {
        if user_message.role != Role::User || assistant_message.role != Role::Assistant {
            return Err(OrchestrationError::InvalidRequest(
                "A turn is a user message followed by an assistant message".to_string(),
            ));
        }
        self.append(key, vec![user_message, assistant_message]).await
    }

    async fn append(&self, key: &SessionKey, messages: Vec<Message>) -> Result<()> {
        let gate = self.gate(key).await;
        let _in_flight = gate
            .append
            .try_lock()
            .map_err(|_| OrchestrationError::ConcurrencyConflict(key.to_string()))?;

        self.ensure_session(key).await?;
        self.store.append_messages(key, &messages).await?;

        debug!(session = %key, appended = messages.len(), "Turn appended");
        Ok(())
    }

    async fn ensure_session(&self, key: &SessionKey) -> Result<()> {
        if self.store.load_session(key, Some(0)).await?.is_none() {
            self.store.create_session(&Session::new(key.clone())).await?;
        }
        Ok(())
    }

    pub async fn register_document(&self, key: &SessionKey, document: DocumentRef) -> Result<()> {
        if document.ref_id.trim().is_empty() {
            return Err(OrchestrationError::InvalidRequest(
                "document ref_id must not be empty".to_string(),
            ));
        }

        self.ensure_session(key).await?;
        self.store.upsert_document(key, &document).await?;

        info!(
            session = %key,
            ref_id = %document.ref_id,
            kind = %document.kind,
            status = %document.status,
            "Document registered"
        );
        Ok(())
    }

    /// Record the outcome of extraction for a registered document.
    pub async fn update_document_status(
        &self,
        key: &SessionKey,
        ref_id: &str,
        status: ExtractionStatus,
    ) -> Result<()> {
        let mut document = self
            .list_documents(key)
            .await?
            .into_iter()
            .find(|d| d.ref_id == ref_id)
            .ok_or_else(|| {
                OrchestrationError::InvalidRequest(format!(
                    "Document {} is not registered in session {}",
                    ref_id, key
                ))
            })?;

        document.status = status;
        self.store.upsert_document(key, &document).await
    }

    pub async fn list_documents(&self, key: &SessionKey) -> Result<Vec<DocumentRef>> {
        Ok(self
            .store
            .load_session(key, Some(0))
            .await?
            .map(|s| s.documents)
            .unwrap_or_default())
    }

    /// Full message log in insertion order.
    pub async fn history(&self, key: &SessionKey) -> Result<Vec<Message>> {
        Ok(self
            .store
            .load_session(key, None)
            .await?
            .map(|s| s.messages)
            .unwrap_or_default())
    }

    pub async fn list_sessions(&self, user_id: &str) -> Result<Vec<SessionSummary>> {
        self.store.list_sessions(user_id).await
    }

    /// Explicit language choice; sticky until changed again.
    pub async fn select_language(&self, key: &SessionKey, code: &str) -> Result<()> {
        let code = code.trim().to_lowercase();
        if crate::language::find(&code).is_none() {
            return Err(OrchestrationError::InvalidRequest(format!(
                "Unsupported language: {}",
                code
            )));
        }

        self.ensure_session(key).await?;
        self.store.set_language(key, &code, true).await?;
        info!(session = %key, language = %code, "Language selected");
        Ok(())
    }

    /// Remember a detected language without pinning it.
    pub async fn remember_language(&self, key: &SessionKey, code: &str) -> Result<()> {
        self.store.set_language(key, code, false).await
    }
}

/// Condense recent history for prompts: `count` latest messages, each
/// truncated to `max_chars`.
pub fn condensed_history(session: &Session, count: usize, max_chars: usize) -> String {
    session
        .recent(count)
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            format!("{}: {}", role, truncate_chars(m.working_text(), max_chars))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Truncate on a char boundary, marking the cut with "...".
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentKind;
    use uuid::Uuid;

    fn manager() -> SessionContextManager {
        SessionContextManager::new(Arc::new(InMemorySessionStore::new()), 4)
    }

    fn key() -> SessionKey {
        SessionKey::new("user-1", "session-1").unwrap()
    }

    fn turn(i: usize) -> (Message, Message) {
        (
            Message::user(&format!("question {}", i), None, "en"),
            Message::assistant(Uuid::new_v4(), format!("answer {}", i), None, "en", None),
        )
    }

    #[tokio::test]
    async fn test_load_context_creates_empty_session() {
        let manager = manager();
        let session = manager.load_context(&key()).await.unwrap();
        assert!(session.is_new());
        assert!(session.documents.is_empty());
        assert_eq!(manager.list_sessions("user-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_log_grows_by_two_per_turn_in_order() {
        let manager = manager();
        for i in 0..5 {
            let (user, assistant) = turn(i);
            manager.commit_turn(&key(), user, assistant).await.unwrap();
        }

        let history = manager.history(&key()).await.unwrap();
        assert_eq!(history.len(), 10);
        for (i, pair) in history.chunks(2).enumerate() {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[0].text, format!("question {}", i));
            assert_eq!(pair[1].role, Role::Assistant);
        }

        let context = manager.load_context(&key()).await.unwrap();
        assert_eq!(context.messages.len(), 4);
        assert_eq!(context.message_count, 10);
        assert_eq!(context.messages[0].text, "question 3");
    }

    #[tokio::test]
    async fn test_commit_turn_rejects_wrong_roles() {
        let manager = manager();
        let (user, assistant) = turn(0);
        let result = manager.commit_turn(&key(), assistant, user).await;
        assert!(matches!(result, Err(OrchestrationError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_concurrent_append_conflicts() {
        let manager = manager();
        manager.load_context(&key()).await.unwrap();

        let gate = manager.gate(&key()).await;
        let held = gate.append.try_lock().unwrap();

        let result = manager.append_turn(&key(), Message::user("hi", None, "en")).await;
        assert!(matches!(result, Err(OrchestrationError::ConcurrencyConflict(_))));

        drop(held);
        tokio_test::assert_ok!(manager.append_turn(&key(), Message::user("hi", None, "en")).await);
    }

    #[tokio::test]
    async fn test_turn_lock_serializes_same_session() {
        let manager = Arc::new(manager());
        let guard = manager.lock_session(&key()).await;

        let contender = {
            let manager = manager.clone();
            tokio::spawn(async move {
                let _guard = manager.lock_session(&key()).await;
            })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        let other = SessionKey::new("user-1", "session-2").unwrap();
        let _independent = manager.lock_session(&other).await;

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_finished_sessions_release_their_gates() {
        let manager = manager();
        for i in 0..200 {
            let key = SessionKey::new("user-1", &format!("session-{}", i)).unwrap();
            let _turn = manager.lock_session(&key).await;
            manager
                .append_turn(&key, Message::user("hi", None, "en"))
                .await
                .unwrap();
        }

        let _last = manager.lock_session(&key()).await;
        assert_eq!(manager.gates.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_held_turn_survives_gate_cleanup() {
        let manager = Arc::new(manager());
        let guard = manager.lock_session(&key()).await;

        for i in 0..5 {
            let other = SessionKey::new("user-2", &format!("session-{}", i)).unwrap();
            drop(manager.lock_session(&other).await);
        }
        assert!(manager.gates.lock().await.contains_key(&key()));

        let contender = {
            let manager = manager.clone();
            tokio::spawn(async move {
                let _guard = manager.lock_session(&key()).await;
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_documents_register_and_update_status() {
        let manager = manager();
        manager
            .register_document(&key(), DocumentRef::new("d1", "q1.xlsx", DocumentKind::Spreadsheet))
            .await
            .unwrap();

        manager
            .update_document_status(&key(), "d1", ExtractionStatus::Ready)
            .await
            .unwrap();
        let docs = manager.list_documents(&key()).await.unwrap();
        assert_eq!(docs[0].status, ExtractionStatus::Ready);

        let missing = manager
            .update_document_status(&key(), "d9", ExtractionStatus::Failed)
            .await;
        assert!(missing.is_err());
    }

    #[tokio::test]
    async fn test_select_language_is_validated_and_pinned() {
        let manager = manager();
        assert!(manager.select_language(&key(), "xx").await.is_err());

        manager.select_language(&key(), "ES").await.unwrap();
        let session = manager.load_context(&key()).await.unwrap();
        assert_eq!(session.language.as_deref(), Some("es"));
        assert!(session.language_pinned);
    }

    #[test]
    fn test_condensed_history_truncates() {
        let mut session = Session::new(key());
        session.messages.push(Message::user(&"x".repeat(50), None, "en"));
        session.messages.push(Message::user("short", None, "en"));

        let condensed = condensed_history(&session, 5, 10);
        assert_eq!(condensed, format!("User: {}...\nUser: short", "x".repeat(10)));
    }
}
