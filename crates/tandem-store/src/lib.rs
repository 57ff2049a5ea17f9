//! Storage engine for Tandem.
//!
//! One SQLite metadata database (users, roles, credentials, messages,
//! settings, scheduled jobs), an on-disk file cache for previewable
//! artifacts, and one isolated knowledge-graph file per role.

pub mod db;
pub mod error;
pub mod file_cache;
pub mod jobs;
pub mod memory;
pub mod messages;
pub mod migration;
pub mod providers;
pub mod roles;
pub mod settings;
pub mod skills;
pub mod tokens;
pub mod users;

pub use db::Database;
pub use error::{StoreError, StoreResult};
pub use file_cache::{FileCache, is_valid_cache_id};
pub use jobs::{Job, JobKind, JobStatus, JobStore};
pub use memory::{Entity, Graph, MemoryGraph, Relation};
pub use messages::{Author, MessageStore, StoredMessage};
pub use providers::ProviderConfigStore;
pub use roles::{Role, RoleStore};
pub use settings::{BootstrapMode, DEFAULT_MAX_ITERATIONS, SettingsStore};
pub use skills::{Skill, SkillStore};
pub use tokens::{OAuthToken, TokenStore};
pub use users::{User, UserStore};

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// In-memory database with migrations applied and two users seeded.
    pub async fn seeded_db() -> Database {
        let db = Database::metadata_in_memory().await.unwrap();
        let users = UserStore::new(db.clone());
        users.ensure("u1", "user-one").await.unwrap();
        users.ensure("u2", "user-two").await.unwrap();
        db
    }
}
