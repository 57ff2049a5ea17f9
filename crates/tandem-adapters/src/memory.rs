//! Memory adapter — the role's knowledge graph exposed as tools.
//!
//! Backed by [`tandem_store::MemoryGraph`], one instance per role, created
//! lazily by the factory with `{role_id, db_path}` token data. The retrieval
//! tools (`memory_search_nodes`, `memory_read_graph`, `memory_open_nodes`)
//! are part of every turn's bootstrap toolset; the write tools are exposed
//! only to the memory-extraction pass.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info};

use tandem_store::{Entity, MemoryGraph, Relation};

use crate::error::{AdapterError, Result};
use crate::traits::{
    Adapter, ResourceContent, ResourceDescriptor, ToolDescriptor, ToolOutcome,
};

/// Names of the retrieval tools included in the bootstrap toolset.
pub const MEMORY_READ_TOOLS: &[&str] =
    &["memory_search_nodes", "memory_read_graph", "memory_open_nodes"];

/// Names of the write tools exposed to the extraction pass.
pub const MEMORY_WRITE_TOOLS: &[&str] = &[
    "memory_create_entities",
    "memory_add_observations",
    "memory_create_relations",
];

/// Adapter exposing one role's memory graph.
pub struct MemoryAdapter {
    role_id: String,
    graph: Arc<MemoryGraph>,
    connected: AtomicBool,
}

impl MemoryAdapter {
    /// Wrap an open graph for `role_id`.
    pub fn new(role_id: impl Into<String>, graph: Arc<MemoryGraph>) -> Self {
        let role_id = role_id.into();
        info!(role_id = %role_id, "memory adapter ready");
        Self {
            role_id,
            graph,
            connected: AtomicBool::new(true),
        }
    }

    /// The role this adapter serves.
    pub fn role_id(&self) -> &str {
        &self.role_id
    }

    fn require_str<'a>(params: &'a Value, field: &str, tool: &str) -> Result<&'a str> {
        params
            .get(field)
            .and_then(Value::as_str)
            .ok_or_else(|| AdapterError::InvalidArguments {
                tool_name: tool.to_string(),
                reason: format!("missing required string field `{field}`"),
            })
    }

    // -- Tool implementations ------------------------------------------------

    async fn tool_search_nodes(&self, params: Value) -> Result<Value> {
        let query = Self::require_str(&params, "query", "memory_search_nodes")?;
        debug!(role_id = %self.role_id, query, "searching memory graph");
        let entities = self.graph.search_nodes(query).await?;
        Ok(json!({ "entities": entities }))
    }

    async fn tool_read_graph(&self) -> Result<Value> {
        self.graph.read_graph_json().await.map_err(Into::into)
    }

    async fn tool_open_nodes(&self, params: Value) -> Result<Value> {
        let names: Vec<String> = params
            .get("names")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .ok_or_else(|| AdapterError::InvalidArguments {
                tool_name: "memory_open_nodes".into(),
                reason: "missing required array field `names`".into(),
            })?;
        let entities = self.graph.open_nodes(names).await?;
        Ok(json!({ "entities": entities }))
    }

    async fn tool_create_entities(&self, params: Value) -> Result<Value> {
        let entities: Vec<Entity> = serde_json::from_value(
            params.get("entities").cloned().unwrap_or(Value::Null),
        )
        .map_err(|e| AdapterError::InvalidArguments {
            tool_name: "memory_create_entities".into(),
            reason: format!("bad `entities` array: {e}"),
        })?;
        let created = self.graph.create_entities(entities).await?;
        Ok(json!({ "created": created.len() }))
    }

    async fn tool_add_observations(&self, params: Value) -> Result<Value> {
        let entity = Self::require_str(&params, "entityName", "memory_add_observations")?;
        let observations: Vec<String> = params
            .get("contents")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let added = self.graph.add_observations(entity, observations).await?;
        Ok(json!({ "added": added }))
    }

    async fn tool_create_relations(&self, params: Value) -> Result<Value> {
        let relations: Vec<Relation> = serde_json::from_value(
            params.get("relations").cloned().unwrap_or(Value::Null),
        )
        .map_err(|e| AdapterError::InvalidArguments {
            tool_name: "memory_create_relations".into(),
            reason: format!("bad `relations` array: {e}"),
        })?;
        let created = self.graph.create_relations(relations).await?;
        Ok(json!({ "created": created }))
    }
}

#[async_trait]
impl Adapter for MemoryAdapter {
    fn provider_key(&self) -> &str {
        "memory"
    }

    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        Ok(memory_tool_descriptors())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutcome> {
        let result = match name {
            "memory_search_nodes" => self.tool_search_nodes(arguments).await,
            "memory_read_graph" => self.tool_read_graph().await,
            "memory_open_nodes" => self.tool_open_nodes(arguments).await,
            "memory_create_entities" => self.tool_create_entities(arguments).await,
            "memory_add_observations" => self.tool_add_observations(arguments).await,
            "memory_create_relations" => self.tool_create_relations(arguments).await,
            _ => {
                return Err(AdapterError::UnknownTool {
                    provider: "memory".into(),
                    tool_name: name.to_string(),
                });
            }
        };

        match result {
            Ok(value) => Ok(ToolOutcome::text(value.to_string())),
            // Caller fault stays an error for the dispatch layer.
            Err(e @ AdapterError::InvalidArguments { .. }) => Err(e),
            Err(e) => Ok(ToolOutcome::error(e.to_string())),
        }
    }

    async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>> {
        Ok(Vec::new())
    }

    async fn read_resource(&self, uri: &str) -> Result<ResourceContent> {
        Err(AdapterError::Resource {
            provider: "memory".into(),
            uri: uri.to_string(),
            reason: "memory adapter exposes no resources".into(),
        })
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn reconnect(&self) -> Result<()> {
        self.connect().await
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Descriptors for all six memory tools.
pub fn memory_tool_descriptors() -> Vec<ToolDescriptor> {
    let tool = |name: &str, description: &str, schema: Value| ToolDescriptor {
        name: name.into(),
        description: description.into(),
        input_schema: schema,
        provider_key: "memory".into(),
        requires_detailed_schema: false,
    };

    vec![
        tool(
            "memory_search_nodes",
            "Search the knowledge graph for entities matching a query",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Keyword to match against entity names, types, and observations"}
                },
                "required": ["query"]
            }),
        ),
        tool(
            "memory_read_graph",
            "Read the entire knowledge graph",
            json!({"type": "object", "properties": {}}),
        ),
        tool(
            "memory_open_nodes",
            "Load specific entities by name",
            json!({
                "type": "object",
                "properties": {
                    "names": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["names"]
            }),
        ),
        tool(
            "memory_create_entities",
            "Create new entities with observations",
            json!({
                "type": "object",
                "properties": {
                    "entities": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "name": {"type": "string"},
                                "entityType": {"type": "string"},
                                "observations": {"type": "array", "items": {"type": "string"}}
                            },
                            "required": ["name", "entityType"]
                        }
                    }
                },
                "required": ["entities"]
            }),
        ),
        tool(
            "memory_add_observations",
            "Append observations to an existing entity",
            json!({
                "type": "object",
                "properties": {
                    "entityName": {"type": "string"},
                    "contents": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["entityName", "contents"]
            }),
        ),
        tool(
            "memory_create_relations",
            "Create directed typed relations between entities",
            json!({
                "type": "object",
                "properties": {
                    "relations": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "from": {"type": "string"},
                                "to": {"type": "string"},
                                "relationType": {"type": "string"}
                            },
                            "required": ["from", "to", "relationType"]
                        }
                    }
                },
                "required": ["relations"]
            }),
        ),
    ]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    async fn adapter() -> MemoryAdapter {
        let graph = Arc::new(MemoryGraph::open_in_memory().await.unwrap());
        MemoryAdapter::new("r1", graph)
    }

    #[tokio::test]
    async fn exposes_six_tools() {
        let adapter = adapter().await;
        let tools = adapter.list_tools().await.unwrap();
        assert_eq!(tools.len(), 6);
        for name in MEMORY_READ_TOOLS.iter().chain(MEMORY_WRITE_TOOLS) {
            assert!(tools.iter().any(|t| t.name == *name), "missing {name}");
        }
    }

    #[tokio::test]
    async fn create_then_search_roundtrip() {
        let adapter = adapter().await;

        let outcome = adapter
            .call_tool(
                "memory_create_entities",
                json!({"entities": [{"name": "Acme", "entityType": "organization", "observations": ["ships anvils"]}]}),
            )
            .await
            .unwrap();
        assert!(!outcome.is_error());

        let outcome = adapter
            .call_tool("memory_search_nodes", json!({"query": "anvils"}))
            .await
            .unwrap();
        assert!(outcome.render().contains("Acme"));
    }

    #[tokio::test]
    async fn read_graph_includes_relations() {
        let adapter = adapter().await;
        adapter
            .call_tool(
                "memory_create_entities",
                json!({"entities": [
                    {"name": "A", "entityType": "t", "observations": []},
                    {"name": "B", "entityType": "t", "observations": []}
                ]}),
            )
            .await
            .unwrap();
        adapter
            .call_tool(
                "memory_create_relations",
                json!({"relations": [{"from": "A", "to": "B", "relationType": "knows"}]}),
            )
            .await
            .unwrap();

        let outcome = adapter
            .call_tool("memory_read_graph", json!({}))
            .await
            .unwrap();
        assert!(outcome.render().contains("knows"));
    }

    #[tokio::test]
    async fn missing_query_is_invalid_arguments() {
        let adapter = adapter().await;
        let result = adapter.call_tool("memory_search_nodes", json!({})).await;
        assert!(matches!(
            result,
            Err(AdapterError::InvalidArguments { .. })
        ));
    }

    #[tokio::test]
    async fn store_failure_becomes_error_outcome() {
        let adapter = adapter().await;
        // Adding observations to a missing entity is a store-level failure,
        // surfaced to the model rather than raised.
        let outcome = adapter
            .call_tool(
                "memory_add_observations",
                json!({"entityName": "ghost", "contents": ["x"]}),
            )
            .await
            .unwrap();
        assert!(outcome.is_error());
    }
}
