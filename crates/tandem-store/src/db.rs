//! SQLite connection handles.
//!
//! Tandem keeps two kinds of database on disk, with different lifecycles:
//! the single **metadata** store (users, roles, credentials, messages,
//! jobs), whose schema this crate owns and migrates on open, and one
//! **graph** file per role, whose schema belongs to [`crate::memory`] and
//! which is created lazily the first time a role's memory adapter comes
//! up. Both kinds share a [`Database`] handle: a connection behind a
//! mutex, with every operation dispatched through [`Database::call`] onto
//! the blocking pool so async callers never hold the runtime hostage.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::StoreResult;
use crate::migration;

/// Which schema and tuning profile a connection carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DatabaseKind {
    /// The shared metadata store. Long-lived, written from many tasks.
    Metadata,
    /// One role's memory graph. Small, single-writer by construction
    /// (the memory adapter serializes its own mutations).
    Graph,
}

/// Handle to one SQLite database, shareable across tasks.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open the metadata store at `path` and bring its schema up to date.
    ///
    /// This is the only constructor that runs migrations; graph files get
    /// their schema from the memory layer instead.
    pub async fn open_metadata(path: impl AsRef<Path> + Send + 'static) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let db = tokio::task::spawn_blocking(move || {
            info!(path = %path.display(), "opening metadata store");
            Self::open_kind(&path, DatabaseKind::Metadata)
        })
        .await??;
        db.call(|conn| migration::run_all(conn)).await?;
        Ok(db)
    }

    /// In-memory metadata store with the full schema applied — the test
    /// fixture counterpart of [`Database::open_metadata`].
    pub async fn metadata_in_memory() -> StoreResult<Self> {
        let db = Self::kind_in_memory(DatabaseKind::Metadata)?;
        db.call(|conn| migration::run_all(conn)).await?;
        Ok(db)
    }

    /// Open (or create) a role's memory graph file. The caller owns the
    /// schema; nothing is migrated here.
    pub fn open_graph(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "opening memory graph file");
        Self::open_kind(path, DatabaseKind::Graph)
    }

    /// In-memory graph database, for tests.
    pub fn graph_in_memory() -> StoreResult<Self> {
        Self::kind_in_memory(DatabaseKind::Graph)
    }

    fn open_kind(path: &Path, kind: DatabaseKind) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::tune(&conn, kind)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn kind_in_memory(kind: DatabaseKind) -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::tune(&conn, kind)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool.
    ///
    /// The closure gets a `&mut Connection`, so both plain statements and
    /// `conn.transaction()` work through the same entry point. A poisoned
    /// lock is recovered rather than propagated: SQLite's own journaling
    /// keeps the file consistent even if a previous holder panicked
    /// mid-statement.
    pub async fn call<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut conn)
        })
        .await?
    }

    /// Per-kind connection tuning, applied once at open.
    fn tune(conn: &Connection, kind: DatabaseKind) -> StoreResult<()> {
        // Both kinds: WAL so readers never block the writer, and relaxed
        // fsync (WAL keeps the file consistent; at worst the tail
        // transaction is lost on power failure).
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        match kind {
            DatabaseKind::Metadata => {
                // The metadata store is hit from every turn and the job
                // poller at once; make concurrent writers queue instead of
                // failing fast.
                conn.pragma_update(None, "busy_timeout", 10_000_i32)?;
            }
            DatabaseKind::Graph => {
                // Graph files have one writer (the role's memory adapter)
                // and stay small; a short timeout is plenty.
                conn.pragma_update(None, "busy_timeout", 1_000_i32)?;
            }
        }
        Ok(())
    }
}

// ── tests ────────────────────────────────────────────────────────────
