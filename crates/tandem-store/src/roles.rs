//! Role persistence.
//!
//! A role is a user-owned agent persona: a name, a job description, an
//! optional system prompt addendum, and a preferred model. Each role also
//! owns an isolated memory graph file; deleting a role is expected to be
//! followed by deleting that file (the caller owns the file lifecycle).

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

/// An agent persona owned by a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    /// Unique identifier (UUID v7).
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Display name (e.g. "Research Assistant").
    pub name: String,
    /// What this persona is for, injected into the system prompt.
    pub job_description: String,
    /// Custom system prompt addendum.
    pub system_prompt: String,
    /// Preferred model identifier, if the role overrides the default.
    pub model: Option<String>,
    /// Unix timestamp when the role was created.
    pub created_at: i64,
    /// Unix timestamp when the role was last updated.
    pub updated_at: i64,
}

/// CRUD operations on roles.
#[derive(Clone)]
pub struct RoleStore {
    db: Database,
}

impl RoleStore {
    /// Create a new role store backed by `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a new role for `user_id`.
    #[instrument(skip(self, job_description, system_prompt))]
    pub async fn create(
        &self,
        user_id: &str,
        name: &str,
        job_description: &str,
        system_prompt: &str,
        model: Option<&str>,
    ) -> StoreResult<Role> {
        let role = Role {
            id: Uuid::now_v7().to_string(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            job_description: job_description.to_string(),
            system_prompt: system_prompt.to_string(),
            model: model.map(str::to_string),
            created_at: Utc::now().timestamp(),
            updated_at: Utc::now().timestamp(),
        };

        let r = role.clone();
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO roles (id, user_id, name, job_description, system_prompt, model, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    rusqlite::params![
                        r.id,
                        r.user_id,
                        r.name,
                        r.job_description,
                        r.system_prompt,
                        r.model,
                        r.created_at,
                        r.updated_at
                    ],
                )?;
                Ok(())
            })
            .await?;

        debug!(role_id = %role.id, "role created");
        Ok(role)
    }

    /// Fetch a role by id.
    #[instrument(skip(self))]
    pub async fn get(&self, id: &str) -> StoreResult<Role> {
        let id_owned = id.to_string();
        let id_err = id.to_string();
        self.db
            .call(move |conn| {
                conn.query_row(
                    "SELECT id, user_id, name, job_description, system_prompt, model, created_at, updated_at \
                     FROM roles WHERE id = ?1",
                    rusqlite::params![id_owned],
                    row_to_role,
                )
                .map_err(StoreError::from)
            })
            .await
            .map_err(|e| match e {
                StoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows) => StoreError::NotFound {
                    entity: "role",
                    id: id_err,
                },
                other => other,
            })
    }

    /// List all roles owned by `user_id`, newest first.
    pub async fn list_for_user(&self, user_id: &str) -> StoreResult<Vec<Role>> {
        let user_id = user_id.to_string();
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, name, job_description, system_prompt, model, created_at, updated_at \
                     FROM roles WHERE user_id = ?1 ORDER BY created_at DESC",
                )?;
                let roles = stmt
                    .query_map(rusqlite::params![user_id], row_to_role)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(roles)
            })
            .await
    }

    /// Update mutable fields of a role.
    #[instrument(skip(self, job_description, system_prompt))]
    pub async fn update(
        &self,
        id: &str,
        name: &str,
        job_description: &str,
        system_prompt: &str,
        model: Option<&str>,
    ) -> StoreResult<()> {
        let id = id.to_string();
        let id_err = id.clone();
        let name = name.to_string();
        let job_description = job_description.to_string();
        let system_prompt = system_prompt.to_string();
        let model = model.map(str::to_string);
        let now = Utc::now().timestamp();

        let changed = self
            .db
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE roles SET name = ?2, job_description = ?3, system_prompt = ?4, model = ?5, updated_at = ?6 \
                     WHERE id = ?1",
                    rusqlite::params![id, name, job_description, system_prompt, model, now],
                )?;
                Ok(n)
            })
            .await?;

        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "role",
                id: id_err,
            });
        }
        Ok(())
    }

    /// Delete a role. Its messages cascade via the schema.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> StoreResult<()> {
        let id = id.to_string();
        let id_err = id.clone();
        let changed = self
            .db
            .call(move |conn| {
                let n = conn.execute("DELETE FROM roles WHERE id = ?1", rusqlite::params![id])?;
                Ok(n)
            })
            .await?;

        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "role",
                id: id_err,
            });
        }
        debug!("role deleted");
        Ok(())
    }
}

fn row_to_role(row: &rusqlite::Row<'_>) -> rusqlite::Result<Role> {
    Ok(Role {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        job_description: row.get(3)?,
        system_prompt: row.get(4)?,
        model: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::seeded_db;

    #[tokio::test]
    async fn create_and_get_role() {
        let db = seeded_db().await;
        let store = RoleStore::new(db);

        let role = store
            .create("u1", "Scout", "finds things", "", Some("claude-sonnet-4-20250514"))
            .await
            .unwrap();

        let fetched = store.get(&role.id).await.unwrap();
        assert_eq!(fetched.name, "Scout");
        assert_eq!(fetched.model.as_deref(), Some("claude-sonnet-4-20250514"));
    }

    #[tokio::test]
    async fn list_is_scoped_to_user() {
        let db = seeded_db().await;
        let store = RoleStore::new(db);

        store.create("u1", "A", "", "", None).await.unwrap();
        store.create("u2", "B", "", "", None).await.unwrap();

        let roles = store.list_for_user("u1").await.unwrap();
        assert_eq!(roles.len(), 1);
        assert_eq!(roles[0].name, "A");
    }

    #[tokio::test]
    async fn update_missing_role_fails() {
        let db = seeded_db().await;
        let store = RoleStore::new(db);
        let result = store.update("nope", "X", "", "", None).await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn delete_removes_role() {
        let db = seeded_db().await;
        let store = RoleStore::new(db);
        let role = store.create("u1", "Gone", "", "", None).await.unwrap();
        store.delete(&role.id).await.unwrap();
        assert!(store.get(&role.id).await.is_err());
    }
}
