//! Static reference documents ("skills").
//!
//! Short reference docs the runtime can surface to clients; write access
//! is an operator concern, so this store only upserts and reads.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

/// One reference document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub id: String,
    pub title: String,
    pub body: String,
    pub created_at: i64,
}

/// CRUD operations on skills.
#[derive(Clone)]
pub struct SkillStore {
    db: Database,
}

impl SkillStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace a skill document.
    pub async fn upsert(&self, id: &str, title: &str, body: &str) -> StoreResult<()> {
        let id = id.to_string();
        let title = title.to_string();
        let body = body.to_string();
        let now = Utc::now().timestamp();
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO skills (id, title, body, created_at) VALUES (?1, ?2, ?3, ?4) \
                     ON CONFLICT(id) DO UPDATE SET title = excluded.title, body = excluded.body",
                    rusqlite::params![id, title, body, now],
                )?;
                Ok(())
            })
            .await
    }

    /// Fetch one skill by id.
    pub async fn get(&self, id: &str) -> StoreResult<Skill> {
        let id_owned = id.to_string();
        let id_err = id.to_string();
        self.db
            .call(move |conn| {
                conn.query_row(
                    "SELECT id, title, body, created_at FROM skills WHERE id = ?1",
                    rusqlite::params![id_owned],
                    |row| {
                        Ok(Skill {
                            id: row.get(0)?,
                            title: row.get(1)?,
                            body: row.get(2)?,
                            created_at: row.get(3)?,
                        })
                    },
                )
                .map_err(StoreError::from)
            })
            .await
            .map_err(|e| match e {
                StoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows) => StoreError::NotFound {
                    entity: "skill",
                    id: id_err,
                },
                other => other,
            })
    }

    /// List all skills, title-ordered.
    pub async fn list(&self) -> StoreResult<Vec<Skill>> {
        self.db
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT id, title, body, created_at FROM skills ORDER BY title")?;
                let skills = stmt
                    .query_map([], |row| {
                        Ok(Skill {
                            id: row.get(0)?,
                            title: row.get(1)?,
                            body: row.get(2)?,
                            created_at: row.get(3)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(skills)
            })
            .await
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::seeded_db;

    #[tokio::test]
    async fn upsert_and_list() {
        let db = seeded_db().await;
        let store = SkillStore::new(db);

        store.upsert("s1", "Email etiquette", "Keep it short.").await.unwrap();
        store.upsert("s2", "Drive hygiene", "Name files well.").await.unwrap();
        store.upsert("s1", "Email etiquette", "Keep it shorter.").await.unwrap();

        let skills = store.list().await.unwrap();
        assert_eq!(skills.len(), 2);
        assert_eq!(store.get("s1").await.unwrap().body, "Keep it shorter.");
    }

    #[tokio::test]
    async fn missing_skill_is_not_found() {
        let db = seeded_db().await;
        let store = SkillStore::new(db);
        assert!(matches!(
            store.get("ghost").await,
            Err(StoreError::NotFound { .. })
        ));
    }
}
