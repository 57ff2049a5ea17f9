//! Per-role memory knowledge graph.
//!
//! Each role owns an isolated graph file: entities carrying free-text
//! observations, and directed typed relations between entities. The graph
//! lives in its own SQLite file (one file per role, opened by exactly one
//! [`MemoryGraph`] at a time). Mutations are serialized through an internal
//! write lock; reads go straight to the connection.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

// ── graph types ──────────────────────────────────────────────────────

/// A node in the knowledge graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    /// Unique name within the graph (e.g. "Acme Corp").
    pub name: String,
    /// Free-form type tag (e.g. "organization", "person").
    #[serde(rename = "entityType")]
    pub entity_type: String,
    /// Facts recorded about this entity, oldest first.
    pub observations: Vec<String>,
}

/// A directed typed edge between two entities.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Relation {
    pub from: String,
    pub to: String,
    #[serde(rename = "relationType")]
    pub relation_type: String,
}

/// A full snapshot of the graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Graph {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
}

// ── store ────────────────────────────────────────────────────────────

/// The knowledge graph for one role.
pub struct MemoryGraph {
    db: Database,
    /// Serializes create/add/delete so concurrent turns for the same role
    /// cannot interleave partial writes. Reads do not take this lock.
    write_lock: Mutex<()>,
}

impl MemoryGraph {
    /// Open (or create) the graph file at `path` and ensure its schema.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db = Database::open_graph(path)?;
        let graph = Self {
            db,
            write_lock: Mutex::new(()),
        };
        graph.init_schema().await?;
        Ok(graph)
    }

    /// In-memory graph — tests only need this.
    pub async fn open_in_memory() -> StoreResult<Self> {
        let db = Database::graph_in_memory()?;
        let graph = Self {
            db,
            write_lock: Mutex::new(()),
        };
        graph.init_schema().await?;
        Ok(graph)
    }

    async fn init_schema(&self) -> StoreResult<()> {
        self.db
            .call(|conn| {
                conn.execute_batch(
                    "CREATE TABLE IF NOT EXISTS entities (
                        name        TEXT PRIMARY KEY,
                        entity_type TEXT NOT NULL
                     );
                     CREATE TABLE IF NOT EXISTS observations (
                        id          INTEGER PRIMARY KEY AUTOINCREMENT,
                        entity_name TEXT NOT NULL REFERENCES entities(name) ON DELETE CASCADE,
                        content     TEXT NOT NULL
                     );
                     CREATE INDEX IF NOT EXISTS idx_observations_entity ON observations(entity_name);
                     CREATE TABLE IF NOT EXISTS relations (
                        from_name     TEXT NOT NULL REFERENCES entities(name) ON DELETE CASCADE,
                        to_name       TEXT NOT NULL REFERENCES entities(name) ON DELETE CASCADE,
                        relation_type TEXT NOT NULL,
                        PRIMARY KEY (from_name, to_name, relation_type)
                     );",
                )?;
                Ok(())
            })
            .await
    }

    /// Create entities, skipping names that already exist. Observations on
    /// a new entity are inserted with it. Returns the entities actually
    /// created.
    #[instrument(skip_all, fields(count = entities.len()))]
    pub async fn create_entities(&self, entities: Vec<Entity>) -> StoreResult<Vec<Entity>> {
        let _guard = self.write_lock.lock().await;
        self.db
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut created = Vec::new();
                for entity in entities {
                    let inserted = tx.execute(
                        "INSERT OR IGNORE INTO entities (name, entity_type) VALUES (?1, ?2)",
                        rusqlite::params![entity.name, entity.entity_type],
                    )?;
                    if inserted == 0 {
                        continue;
                    }
                    for observation in &entity.observations {
                        tx.execute(
                            "INSERT INTO observations (entity_name, content) VALUES (?1, ?2)",
                            rusqlite::params![entity.name, observation],
                        )?;
                    }
                    created.push(entity);
                }
                tx.commit()?;
                Ok(created)
            })
            .await
    }

    /// Append observations to an existing entity.
    #[instrument(skip(self, observations))]
    pub async fn add_observations(
        &self,
        entity_name: &str,
        observations: Vec<String>,
    ) -> StoreResult<usize> {
        let _guard = self.write_lock.lock().await;
        let entity_name = entity_name.to_string();
        let name_err = entity_name.clone();
        self.db
            .call(move |conn| {
                let exists: i64 = conn.query_row(
                    "SELECT count(*) FROM entities WHERE name = ?1",
                    rusqlite::params![entity_name],
                    |row| row.get(0),
                )?;
                if exists == 0 {
                    return Err(StoreError::NotFound {
                        entity: "memory_entity",
                        id: entity_name,
                    });
                }
                let tx = conn.transaction()?;
                let mut added = 0;
                for observation in &observations {
                    added += tx.execute(
                        "INSERT INTO observations (entity_name, content) VALUES (?1, ?2)",
                        rusqlite::params![entity_name, observation],
                    )?;
                }
                tx.commit()?;
                Ok(added)
            })
            .await
            .map_err(|e| match e {
                StoreError::NotFound { entity, .. } => StoreError::NotFound {
                    entity,
                    id: name_err,
                },
                other => other,
            })
    }

    /// Create relations, skipping duplicates and edges whose endpoints do
    /// not exist. Returns the number of relations created.
    #[instrument(skip_all, fields(count = relations.len()))]
    pub async fn create_relations(&self, relations: Vec<Relation>) -> StoreResult<usize> {
        let _guard = self.write_lock.lock().await;
        self.db
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut created = 0;
                for relation in &relations {
                    let endpoints: i64 = tx.query_row(
                        "SELECT count(*) FROM entities WHERE name IN (?1, ?2)",
                        rusqlite::params![relation.from, relation.to],
                        |row| row.get(0),
                    )?;
                    if endpoints < 2 {
                        debug!(from = %relation.from, to = %relation.to, "skipping relation with missing endpoint");
                        continue;
                    }
                    created += tx.execute(
                        "INSERT OR IGNORE INTO relations (from_name, to_name, relation_type) \
                         VALUES (?1, ?2, ?3)",
                        rusqlite::params![relation.from, relation.to, relation.relation_type],
                    )?;
                }
                tx.commit()?;
                Ok(created)
            })
            .await
    }

    /// Delete an entity together with its observations and relations.
    #[instrument(skip(self))]
    pub async fn delete_entity(&self, name: &str) -> StoreResult<bool> {
        let _guard = self.write_lock.lock().await;
        let name = name.to_string();
        self.db
            .call(move |conn| {
                let n = conn.execute(
                    "DELETE FROM entities WHERE name = ?1",
                    rusqlite::params![name],
                )?;
                Ok(n > 0)
            })
            .await
    }

    /// Keyword search across entity names, types, and observation text.
    /// Results are ordered by name for determinism.
    pub async fn search_nodes(&self, query: &str) -> StoreResult<Vec<Entity>> {
        let pattern = format!("%{}%", query.trim());
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT DISTINCT e.name FROM entities e \
                     LEFT JOIN observations o ON o.entity_name = e.name \
                     WHERE e.name LIKE ?1 OR e.entity_type LIKE ?1 OR o.content LIKE ?1 \
                     ORDER BY e.name",
                )?;
                let names = stmt
                    .query_map(rusqlite::params![pattern], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                load_entities(conn, &names)
            })
            .await
    }

    /// Load the named entities (missing names are silently dropped).
    pub async fn open_nodes(&self, names: Vec<String>) -> StoreResult<Vec<Entity>> {
        self.db
            .call(move |conn| load_entities(conn, &names))
            .await
    }

    /// Snapshot the full graph.
    pub async fn read_graph(&self) -> StoreResult<Graph> {
        self.db
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT name FROM entities ORDER BY name")?;
                let names = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                let entities = load_entities(conn, &names)?;

                let mut stmt = conn.prepare(
                    "SELECT from_name, to_name, relation_type FROM relations \
                     ORDER BY from_name, to_name, relation_type",
                )?;
                let relations = stmt
                    .query_map([], |row| {
                        Ok(Relation {
                            from: row.get(0)?,
                            to: row.get(1)?,
                            relation_type: row.get(2)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(Graph {
                    entities,
                    relations,
                })
            })
            .await
    }

    /// Render the graph as the JSON value tool results carry.
    pub async fn read_graph_json(&self) -> StoreResult<serde_json::Value> {
        let graph = self.read_graph().await?;
        Ok(json!(graph))
    }
}

/// Load full entities (with observations) for the given names, preserving
/// input order.
fn load_entities(conn: &rusqlite::Connection, names: &[String]) -> StoreResult<Vec<Entity>> {
    let mut entities = Vec::with_capacity(names.len());
    for name in names {
        let row = conn.query_row(
            "SELECT name, entity_type FROM entities WHERE name = ?1",
            rusqlite::params![name],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                ))
            },
        );
        let (name, entity_type) = match row {
            Ok(pair) => pair,
            Err(rusqlite::Error::QueryReturnedNoRows) => continue,
            Err(e) => return Err(e.into()),
        };

        let mut stmt = conn.prepare(
            "SELECT content FROM observations WHERE entity_name = ?1 ORDER BY id",
        )?;
        let observations = stmt
            .query_map(rusqlite::params![name], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        entities.push(Entity {
            name,
            entity_type,
            observations,
        });
    }
    Ok(entities)
}

// ── tests ────────────────────────────────────────────────────────────
