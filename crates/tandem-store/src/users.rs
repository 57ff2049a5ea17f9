//! User records.
//!
//! Authentication itself lives outside the runtime; this store only keeps
//! the rows that the rest of the schema hangs off.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

/// A user known to the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub created_at: i64,
}

/// CRUD operations on users.
#[derive(Clone)]
pub struct UserStore {
    db: Database,
}

impl UserStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a user with a fresh id.
    pub async fn create(&self, username: &str) -> StoreResult<User> {
        let user = User {
            id: Uuid::now_v7().to_string(),
            username: username.to_string(),
            created_at: Utc::now().timestamp(),
        };
        let u = user.clone();
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO users (id, username, created_at) VALUES (?1, ?2, ?3)",
                    rusqlite::params![u.id, u.username, u.created_at],
                )?;
                Ok(())
            })
            .await?;
        debug!(user_id = %user.id, "user created");
        Ok(user)
    }

    /// Insert a user with a caller-chosen id if it does not already exist.
    ///
    /// Used for the job-runner principal and for test fixtures.
    pub async fn ensure(&self, id: &str, username: &str) -> StoreResult<()> {
        let id = id.to_string();
        let username = username.to_string();
        let now = Utc::now().timestamp();
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO users (id, username, created_at) VALUES (?1, ?2, ?3)",
                    rusqlite::params![id, username, now],
                )?;
                Ok(())
            })
            .await
    }

    /// Fetch a user by id.
    pub async fn get(&self, id: &str) -> StoreResult<User> {
        let id_owned = id.to_string();
        let id_err = id.to_string();
        self.db
            .call(move |conn| {
                conn.query_row(
                    "SELECT id, username, created_at FROM users WHERE id = ?1",
                    rusqlite::params![id_owned],
                    |row| {
                        Ok(User {
                            id: row.get(0)?,
                            username: row.get(1)?,
                            created_at: row.get(2)?,
                        })
                    },
                )
                .map_err(StoreError::from)
            })
            .await
            .map_err(|e| match e {
                StoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows) => StoreError::NotFound {
                    entity: "user",
                    id: id_err,
                },
                other => other,
            })
    }
}

// ── tests ────────────────────────────────────────────────────────────
