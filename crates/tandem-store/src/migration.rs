//! Schema migration system.
//!
//! Migrations are stored as static SQL strings keyed by version number.
//! The current version is tracked in a `_migrations` table so migrations
//! are idempotent and only run once.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};

/// A single migration definition.
struct Migration {
    /// Monotonically increasing version number (1, 2, 3, ...).
    version: u32,
    /// Human-readable description.
    description: &'static str,
    /// Raw SQL to execute. May contain multiple statements separated by `;`.
    sql: &'static str,
}

/// All migrations in order. Add new migrations to the end of this array.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "identity — users, sessions, roles",
        sql: r#"
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                username    TEXT NOT NULL UNIQUE,
                created_at  INTEGER NOT NULL
            );

            CREATE TABLE sessions (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                created_at  INTEGER NOT NULL,
                expires_at  INTEGER
            );
            CREATE INDEX idx_sessions_user ON sessions(user_id);

            CREATE TABLE roles (
                id              TEXT PRIMARY KEY,
                user_id         TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                name            TEXT NOT NULL,
                job_description TEXT NOT NULL DEFAULT '',
                system_prompt   TEXT NOT NULL DEFAULT '',
                model           TEXT,
                created_at      INTEGER NOT NULL,
                updated_at      INTEGER NOT NULL
            );
            CREATE INDEX idx_roles_user ON roles(user_id);
        "#,
    },
    Migration {
        version: 2,
        description: "credentials — oauth tokens and provider config blobs",
        sql: r#"
            CREATE TABLE oauth_tokens (
                user_id       TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                provider      TEXT NOT NULL,
                account_email TEXT NOT NULL,
                access_token  TEXT NOT NULL,
                refresh_token TEXT,
                expires_at    INTEGER,
                updated_at    INTEGER NOT NULL,
                PRIMARY KEY (user_id, provider, account_email)
            );

            CREATE TABLE provider_configs (
                user_id    TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                provider   TEXT NOT NULL,
                config     TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, provider)
            );
        "#,
    },
    Migration {
        version: 3,
        description: "conversation — messages, settings, skills reference docs",
        sql: r#"
            CREATE TABLE messages (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id    TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                role_id    TEXT REFERENCES roles(id) ON DELETE CASCADE,
                author     TEXT NOT NULL CHECK(author IN ('user','assistant','system')),
                content    TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX idx_messages_user_role ON messages(user_id, role_id, created_at);

            CREATE TABLE settings (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE skills (
                id         TEXT PRIMARY KEY,
                title      TEXT NOT NULL,
                body       TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
        "#,
    },
    Migration {
        version: 4,
        description: "scheduling — scheduled_jobs with claim lease",
        sql: r#"
            CREATE TABLE scheduled_jobs (
                id           TEXT PRIMARY KEY,
                user_id      TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                role_id      TEXT REFERENCES roles(id) ON DELETE SET NULL,
                description  TEXT NOT NULL,
                kind         TEXT NOT NULL CHECK(kind IN ('once','recurring')),
                schedule     TEXT,
                run_at       INTEGER,
                status       TEXT NOT NULL CHECK(status IN ('pending','running','completed','failed','cancelled')),
                hold_until   INTEGER,
                last_run_at  INTEGER,
                last_error   TEXT,
                run_count    INTEGER NOT NULL DEFAULT 0,
                fail_streak  INTEGER NOT NULL DEFAULT 0,
                created_at   INTEGER NOT NULL,
                updated_at   INTEGER NOT NULL
            );
            CREATE INDEX idx_jobs_status ON scheduled_jobs(status);
            CREATE INDEX idx_jobs_user ON scheduled_jobs(user_id);
        "#,
    },
];

/// Run all migrations that have not yet been applied.
pub fn run_all(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at  INTEGER NOT NULL
        )",
    )?;

    let current: u32 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| {
            row.get(0)
        })
        .unwrap_or(0);

    for migration in MIGRATIONS {
        if migration.version <= current {
            debug!(version = migration.version, "migration already applied");
            continue;
        }

        info!(
            version = migration.version,
            description = migration.description,
            "applying migration"
        );

        conn.execute_batch(migration.sql)
            .map_err(|e| StoreError::Migration {
                version: migration.version,
                message: e.to_string(),
            })?;

        conn.execute(
            "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![
                migration.version,
                migration.description,
                chrono::Utc::now().timestamp(),
            ],
        )?;
    }

    Ok(())
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_versions_are_strictly_increasing() {
        let mut prev = 0;
        for m in MIGRATIONS {
            assert!(m.version > prev, "version {} not > {}", m.version, prev);
            prev = m.version;
        }
    }

    #[test]
    fn run_all_applies_every_migration() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();

        let applied: u32 = conn
            .query_row("SELECT MAX(version) FROM _migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(applied, MIGRATIONS.last().unwrap().version);
    }

    #[test]
    fn rerun_is_a_noop() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();
        run_all(&conn).unwrap();

        let rows: i64 = conn
            .query_row("SELECT count(*) FROM _migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, MIGRATIONS.len() as i64);
    }
}
