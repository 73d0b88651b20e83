//! Postgres-backed session store

use super::store::{missing_session, SessionStore};
use crate::error::OrchestrationError;
use crate::models::{
    DocumentRef, Message, Session, SessionKey, SessionSummary, ToolInvocation,
};
use crate::Result;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

pub struct PostgresSessionStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PostgresSessionStore {
    /// Connect lazily; tables are created on first use.
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)
            .map_err(|e| {
                OrchestrationError::DatabaseError(format!("Invalid database URL: {}", e))
            })?;

        info!("Session store backend: postgres");
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        }
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS chat_sessions (
                      user_id TEXT NOT NULL,
                      session_id TEXT NOT NULL,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                      last_active TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                      language TEXT,
                      language_pinned BOOLEAN NOT NULL DEFAULT FALSE,
                      PRIMARY KEY (user_id, session_id)
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS chat_messages (
                      seq BIGSERIAL PRIMARY KEY,
                      message_id UUID NOT NULL UNIQUE,
                      user_id TEXT NOT NULL,
                      session_id TEXT NOT NULL,
                      role TEXT NOT NULL,
                      text TEXT NOT NULL,
                      translated_text TEXT,
                      language TEXT NOT NULL,
                      invocation TEXT,
                      created_at TIMESTAMPTZ NOT NULL,
                      FOREIGN KEY (user_id, session_id) REFERENCES chat_sessions (user_id, session_id)
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_chat_messages_session_seq
                    ON chat_messages (user_id, session_id, seq);
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS session_documents (
                      user_id TEXT NOT NULL,
                      session_id TEXT NOT NULL,
                      ref_id TEXT NOT NULL,
                      name TEXT NOT NULL,
                      kind TEXT NOT NULL,
                      status TEXT NOT NULL,
                      source TEXT,
                      registered_at TIMESTAMPTZ NOT NULL,
                      PRIMARY KEY (user_id, session_id, ref_id)
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                OrchestrationError::DatabaseError(format!(
                    "Failed to initialize session schema: {}",
                    e
                ))
            })?;

        Ok(())
    }

    fn message_from_row(row: &PgRow) -> Result<Message> {
        let role: String = row.try_get("role")?;
        let invocation: Option<String> = row.try_get("invocation")?;
        let invocation = match invocation {
            Some(raw) => serde_json::from_str::<Option<ToolInvocation>>(&raw)?,
            None => None,
        };

        Ok(Message {
            message_id: row.try_get("message_id")?,
            role: role.parse()?,
            text: row.try_get("text")?,
            translated_text: row.try_get("translated_text")?,
            language: row.try_get("language")?,
            timestamp: row.try_get("created_at")?,
            invocation,
        })
    }

    fn document_from_row(row: &PgRow) -> Result<DocumentRef> {
        let kind: String = row.try_get("kind")?;
        let status: String = row.try_get("status")?;

        Ok(DocumentRef {
            ref_id: row.try_get("ref_id")?,
            name: row.try_get("name")?,
            kind: kind.parse()?,
            status: status.parse()?,
            source: row.try_get("source")?,
            registered_at: row.try_get("registered_at")?,
        })
    }
}

#[async_trait::async_trait]
impl SessionStore for PostgresSessionStore {
    async fn load_session(
        &self,
        key: &SessionKey,
        history_limit: Option<usize>,
    ) -> Result<Option<Session>> {
        self.ensure_schema().await?;

        let Some(row) = sqlx::query(
            r#"
            SELECT created_at, last_active, language, language_pinned
            FROM chat_sessions
            WHERE user_id = $1 AND session_id = $2
            "#,
        )
        .bind(&key.user_id)
        .bind(&key.session_id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let message_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM chat_messages WHERE user_id = $1 AND session_id = $2",
        )
        .bind(&key.user_id)
        .bind(&key.session_id)
        .fetch_one(&self.pool)
        .await?;

        let limit = history_limit.map(|n| n as i64).unwrap_or(i64::MAX);
        let message_rows = sqlx::query(
            r#"
            SELECT message_id, role, text, translated_text, language, invocation, created_at
            FROM chat_messages
            WHERE user_id = $1 AND session_id = $2
            ORDER BY seq DESC
            LIMIT $3
            "#,
        )
        .bind(&key.user_id)
        .bind(&key.session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            OrchestrationError::DatabaseError(format!("Failed to load session history: {}", e))
        })?;

        let mut messages = message_rows
            .iter()
            .map(Self::message_from_row)
            .collect::<Result<Vec<_>>>()?;
        messages.reverse();

        let document_rows = sqlx::query(
            r#"
            SELECT ref_id, name, kind, status, source, registered_at
            FROM session_documents
            WHERE user_id = $1 AND session_id = $2
            ORDER BY registered_at ASC
            "#,
        )
        .bind(&key.user_id)
        .bind(&key.session_id)
        .fetch_all(&self.pool)
        .await?;

        let documents = document_rows
            .iter()
            .map(Self::document_from_row)
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(Session {
            key: key.clone(),
            created_at: row.try_get("created_at")?,
            last_active: row.try_get("last_active")?,
            language: row.try_get("language")?,
            language_pinned: row.try_get("language_pinned")?,
            messages,
            message_count: message_count.max(0) as usize,
            documents,
        }))
    }

    async fn create_session(&self, session: &Session) -> Result<()> {
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            INSERT INTO chat_sessions (user_id, session_id, created_at, last_active, language, language_pinned)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id, session_id) DO NOTHING
            "#,
        )
        .bind(&session.key.user_id)
        .bind(&session.key.session_id)
        .bind(session.created_at)
        .bind(session.last_active)
        .bind(&session.language)
        .bind(session.language_pinned)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn append_messages(&self, key: &SessionKey, messages: &[Message]) -> Result<()> {
        self.ensure_schema().await?;

        let mut tx = self.pool.begin().await.map_err(|e| {
            OrchestrationError::DatabaseError(format!(
                "Failed to begin transaction for appending messages: {}",
                e
            ))
        })?;

        let touched = sqlx::query(
            "UPDATE chat_sessions SET last_active = NOW() WHERE user_id = $1 AND session_id = $2",
        )
        .bind(&key.user_id)
        .bind(&key.session_id)
        .execute(&mut *tx)
        .await?;

        if touched.rows_affected() == 0 {
            return Err(missing_session(key));
        }

        for message in messages {
            let invocation = serde_json::to_string(&message.invocation)?;

            sqlx::query(
                r#"
                INSERT INTO chat_messages
                  (message_id, user_id, session_id, role, text, translated_text, language, invocation, created_at)
                VALUES
                  ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(message.message_id)
            .bind(&key.user_id)
            .bind(&key.session_id)
            .bind(message.role.to_string())
            .bind(&message.text)
            .bind(&message.translated_text)
            .bind(&message.language)
            .bind(invocation)
            .bind(message.timestamp)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                OrchestrationError::DatabaseError(format!("Failed to insert chat message: {}", e))
            })?;
        }

        tx.commit().await.map_err(|e| {
            OrchestrationError::DatabaseError(format!(
                "Failed to commit message transaction: {}",
                e
            ))
        })?;

        Ok(())
    }

    async fn upsert_document(&self, key: &SessionKey, document: &DocumentRef) -> Result<()> {
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            INSERT INTO session_documents
              (user_id, session_id, ref_id, name, kind, status, source, registered_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (user_id, session_id, ref_id)
            DO UPDATE SET name = EXCLUDED.name, kind = EXCLUDED.kind,
                          status = EXCLUDED.status, source = EXCLUDED.source
            "#,
        )
        .bind(&key.user_id)
        .bind(&key.session_id)
        .bind(&document.ref_id)
        .bind(&document.name)
        .bind(document.kind.to_string())
        .bind(document.status.to_string())
        .bind(&document.source)
        .bind(document.registered_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_language(&self, key: &SessionKey, language: &str, pinned: bool) -> Result<()> {
        self.ensure_schema().await?;

        let updated = sqlx::query(
            r#"
            UPDATE chat_sessions SET language = $3, language_pinned = $4
            WHERE user_id = $1 AND session_id = $2
            "#,
        )
        .bind(&key.user_id)
        .bind(&key.session_id)
        .bind(language)
        .bind(pinned)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(missing_session(key));
        }
        Ok(())
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<SessionSummary>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            r#"
            SELECT s.session_id, s.created_at, s.last_active, s.language,
                   (SELECT COUNT(*) FROM chat_messages m
                     WHERE m.user_id = s.user_id AND m.session_id = s.session_id) AS message_count
            FROM chat_sessions s
            WHERE s.user_id = $1
            ORDER BY s.last_active DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let session_id: String = row.try_get("session_id")?;
                let message_count: i64 = row.try_get("message_count")?;
                Ok(SessionSummary {
                    key: SessionKey::new(user_id, &session_id)?,
                    created_at: row.try_get("created_at")?,
                    last_active: row.try_get("last_active")?,
                    message_count: message_count.max(0) as usize,
                    language: row.try_get("language")?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Option<PostgresSessionStore> {
        let url = std::env::var("DATABASE_URL").ok()?;
        Some(PostgresSessionStore::connect_lazy(&url).unwrap())
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL"]
    async fn test_set_language_on_missing_session_fails() {
        let Some(store) = store() else { return };
        let key = SessionKey::new("ghost-user", &uuid::Uuid::new_v4().to_string()).unwrap();

        let result = store.set_language(&key, "fr", true).await;
        assert!(matches!(result, Err(OrchestrationError::StateError(_))));
    }
}
