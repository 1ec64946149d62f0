//! Session storage and the bounded history manager
//!
//! Each session owns an ordered turn log capped at `history_cap` entries.
//! Eviction is strictly FIFO and happens on every append, before the new
//! turn lands, so the cap holds immediately after each write. Reads never
//! evict.

use crate::error::{EngineError, Result};
use crate::types::{ChatTurn, Role, Session, SessionId};

use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

/// Default number of retained turns per session
pub const DEFAULT_HISTORY_CAP: usize = 10;

/// Store for sessions and their bounded histories
#[derive(Clone)]
pub struct SessionStore {
    pool: SqlitePool,
    history_cap: usize,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("history_cap", &self.history_cap)
            .finish()
    }
}

impl SessionStore {
    pub fn new(pool: SqlitePool) -> Arc<Self> {
        Self::with_cap(pool, DEFAULT_HISTORY_CAP)
    }

    /// A cap of zero is floored to one: every append must be able to retain
    /// at least the turn it just wrote.
    pub fn with_cap(pool: SqlitePool, history_cap: usize) -> Arc<Self> {
        Arc::new(Self {
            pool,
            history_cap: history_cap.max(1),
        })
    }

    pub fn history_cap(&self) -> usize {
        self.history_cap
    }

    /// Create a session for `user_name`, or return the existing one when
    /// `session_id` is already taken. Idempotent for explicit ids.
    pub async fn create(
        &self,
        user_name: &str,
        session_id: Option<&str>,
    ) -> Result<SessionId> {
        if let Some(id) = session_id {
            if self.get(id).await?.is_some() {
                return Ok(id.to_string());
            }
        }

        let id = session_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        sqlx::query(
            r#"
            INSERT INTO sessions (session_id, user_name, name, history, created_at)
            VALUES (?, ?, NULL, '[]', ?)
            "#,
        )
        .bind(&id)
        .bind(user_name)
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    /// Load a session by id
    pub async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        let row = sqlx::query(
            r#"
            SELECT session_id, user_name, name, history, created_at
            FROM sessions
            WHERE session_id = ?
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| row_to_session(&row)))
    }

    /// All sessions belonging to a user, oldest first
    pub async fn sessions_for_user(&self, user_name: &str) -> Result<Vec<Session>> {
        let rows = sqlx::query(
            r#"
            SELECT session_id, user_name, name, history, created_at
            FROM sessions
            WHERE user_name = ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_name)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_session).collect())
    }

    /// Read a session's history without mutating it.
    ///
    /// Unknown sessions read as empty: a not-yet-created session is simply a
    /// new conversation.
    pub async fn history(&self, session_id: &str) -> Result<Vec<ChatTurn>> {
        Ok(self
            .get(session_id)
            .await?
            .map(|s| s.history)
            .unwrap_or_default())
    }

    /// True until the first turn with role `user` is appended
    pub async fn is_first_user_message(&self, session_id: &str) -> Result<bool> {
        let history = self.history(session_id).await?;
        Ok(!history.iter().any(|t| t.role == Role::User))
    }

    /// Append a turn, evicting oldest entries first so the cap is never
    /// exceeded. Returns the post-cap history.
    ///
    /// The read-modify-write runs in one transaction so concurrent appends
    /// to the same session cannot lose turns.
    pub async fn append(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
    ) -> Result<Vec<ChatTurn>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT history FROM sessions WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;

        let raw: String = row.try_get("history")?;
        let mut history = parse_history(&raw);

        if history.len() >= self.history_cap {
            let drop = history.len() - self.history_cap + 1;
            history.drain(..drop);
        }
        history.push(ChatTurn::new(role, content));

        let serialized = serde_json::to_string(&history)
            .map_err(|e| EngineError::Serialization(e.to_string()))?;

        sqlx::query("UPDATE sessions SET history = ? WHERE session_id = ?")
            .bind(serialized)
            .bind(session_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(history)
    }

    /// Set a session's display name
    pub async fn rename(&self, session_id: &str, name: &str) -> Result<()> {
        let result = sqlx::query("UPDATE sessions SET name = ? WHERE session_id = ?")
            .bind(name)
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::SessionNotFound(session_id.to_string()));
        }

        Ok(())
    }
}

/// Tolerate malformed history blobs by starting over, matching the
/// reset-to-empty behavior of the original store
fn parse_history(raw: &str) -> Vec<ChatTurn> {
    serde_json::from_str(raw).unwrap_or_default()
}

fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> Session {
    let raw: String = row.try_get("history").unwrap_or_default();

    Session {
        session_id: row.try_get("session_id").unwrap_or_default(),
        user_name: row.try_get("user_name").unwrap_or_default(),
        name: row.try_get("name").ok(),
        history: parse_history(&raw),
        created_at: row
            .try_get("created_at")
            .unwrap_or_else(|_| chrono::Utc::now()),
    }
}
