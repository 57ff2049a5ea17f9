//! Conversation message persistence.
//!
//! Messages are keyed by (user, role) and ordered by creation time. The
//! orchestrator appends the user turn and the final assistant text here;
//! synthetic tool-result messages live only in the in-flight conversation
//! and are never persisted.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

/// Who authored a persisted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Author {
    User,
    Assistant,
    System,
}

impl Author {
    fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }

    fn parse(s: &str) -> StoreResult<Self> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            other => Err(StoreError::Rejected(format!(
                "unknown author `{other}`"
            ))),
        }
    }
}

/// A persisted chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub user_id: String,
    pub role_id: Option<String>,
    pub author: Author,
    pub content: String,
    pub created_at: i64,
}

/// CRUD operations on persisted messages.
#[derive(Clone)]
pub struct MessageStore {
    db: Database,
}

impl MessageStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a message and return its row id.
    #[instrument(skip(self, content))]
    pub async fn append(
        &self,
        user_id: &str,
        role_id: Option<&str>,
        author: Author,
        content: &str,
    ) -> StoreResult<i64> {
        let user_id = user_id.to_string();
        let role_id = role_id.map(str::to_string);
        let content = content.to_string();
        let now = Utc::now().timestamp();
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO messages (user_id, role_id, author, content, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![user_id, role_id, author.as_str(), content, now],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
    }

    /// Load the most recent `limit` messages for (user, role), oldest first.
    pub async fn recent(
        &self,
        user_id: &str,
        role_id: Option<&str>,
        limit: u32,
    ) -> StoreResult<Vec<StoredMessage>> {
        let user_id = user_id.to_string();
        let role_id = role_id.map(str::to_string);
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, role_id, author, content, created_at FROM messages \
                     WHERE user_id = ?1 AND (role_id IS ?2) \
                     ORDER BY created_at DESC, id DESC LIMIT ?3",
                )?;
                let mut messages = stmt
                    .query_map(rusqlite::params![user_id, role_id, limit], row_to_message)?
                    .collect::<Result<Vec<_>, _>>()?
                    .into_iter()
                    .collect::<StoreResult<Vec<_>>>()?;
                messages.reverse();
                Ok(messages)
            })
            .await
    }

    /// Delete all messages for (user, role).
    pub async fn clear(&self, user_id: &str, role_id: Option<&str>) -> StoreResult<usize> {
        let user_id = user_id.to_string();
        let role_id = role_id.map(str::to_string);
        self.db
            .call(move |conn| {
                let n = conn.execute(
                    "DELETE FROM messages WHERE user_id = ?1 AND (role_id IS ?2)",
                    rusqlite::params![user_id, role_id],
                )?;
                Ok(n)
            })
            .await
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoreResult<StoredMessage>> {
    let author_raw: String = row.get(3)?;
    Ok(match Author::parse(&author_raw) {
        Ok(author) => Ok(StoredMessage {
            id: row.get(0)?,
            user_id: row.get(1)?,
            role_id: row.get(2)?,
            author,
            content: row.get(4)?,
            created_at: row.get(5)?,
        }),
        Err(e) => Err(e),
    })
}

// ── tests ────────────────────────────────────────────────────────────
