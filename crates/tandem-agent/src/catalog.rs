//! Tool catalog and semantic search.
//!
//! Aggregates tool descriptors across all live adapters into an immutable
//! snapshot (rebuilt copy-then-swap, so readers always see a consistent
//! view), answers constant-time `find_server` lookups, and ranks tools
//! against a free-text query with a tf·idf cosine index over
//! `(name, description)` tokens. Scoring is deterministic for a fixed
//! catalog: ties break on tool name.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use serde_json::{Value, json};
use tracing::{debug, info};

use tandem_adapters::{Adapter, ToolDescriptor, Visibility};

use crate::error::Result;

/// Name of the discovery meta-tool; excluded from its own results.
pub const SEARCH_TOOL_NAME: &str = "search_tool";

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// One ranked search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub tool: ToolDescriptor,
    /// Similarity in [0, 1].
    pub score: f64,
}

#[derive(Default)]
struct Snapshot {
    /// providerKey → tools, as last reported by each adapter.
    tools_by_provider: HashMap<String, Vec<ToolDescriptor>>,
    /// toolName → providerKey.
    tool_index: HashMap<String, String>,
    /// Vector index over searchable tools.
    index: SearchIndex,
}

/// The shared catalog. Cheap to clone; readers never block a refresh.
#[derive(Clone, Default)]
pub struct ToolCatalog {
    snapshot: Arc<RwLock<Arc<Snapshot>>>,
    /// Providers whose tools never appear in search results.
    hidden: Arc<RwLock<HashSet<String>>>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a provider's tools as hidden from search (memory, scheduler).
    pub fn set_hidden_providers(&self, providers: impl IntoIterator<Item = String>) {
        let mut hidden = self.hidden.write().expect("hidden lock");
        *hidden = providers.into_iter().collect();
    }

    /// Rebuild the catalog from the given live adapters and swap it in
    /// atomically. Safe to call at the start of every turn; an adapter
    /// whose `list_tools` fails keeps its previous entry.
    pub async fn refresh(&self, adapters: &[Arc<dyn Adapter>]) -> Result<()> {
        let previous = self.current();
        let mut tools_by_provider: HashMap<String, Vec<ToolDescriptor>> = HashMap::new();

        for adapter in adapters {
            let key = adapter.provider_key().to_string();
            match adapter.list_tools().await {
                Ok(tools) => {
                    tools_by_provider.insert(key, tools);
                }
                Err(e) => {
                    debug!(provider = %key, error = %e, "list_tools failed; keeping stale entry");
                    if let Some(stale) = previous.tools_by_provider.get(&key) {
                        tools_by_provider.insert(key, stale.clone());
                    }
                }
            }
        }

        let mut tool_index = HashMap::new();
        for (provider, tools) in &tools_by_provider {
            for tool in tools {
                tool_index.insert(tool.name.clone(), provider.clone());
            }
        }

        let hidden = self.hidden.read().expect("hidden lock").clone();
        let searchable: Vec<ToolDescriptor> = tools_by_provider
            .iter()
            .filter(|(provider, _)| !hidden.contains(*provider))
            .flat_map(|(_, tools)| tools.iter().cloned())
            .collect();
        let index = SearchIndex::build(&searchable);

        let snapshot = Arc::new(Snapshot {
            tools_by_provider,
            tool_index,
            index,
        });

        let tool_count = snapshot.tool_index.len();
        *self.snapshot.write().expect("snapshot lock") = snapshot;
        info!(tool_count, "tool catalog refreshed");
        Ok(())
    }

    fn current(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot.read().expect("snapshot lock"))
    }

    /// The provider that owns `tool_name`, if any.
    pub fn find_server(&self, tool_name: &str) -> Option<String> {
        self.current().tool_index.get(tool_name).cloned()
    }

    /// The full descriptor for `tool_name`, if any.
    pub fn tool(&self, tool_name: &str) -> Option<ToolDescriptor> {
        let snapshot = self.current();
        let provider = snapshot.tool_index.get(tool_name)?;
        snapshot
            .tools_by_provider
            .get(provider)?
            .iter()
            .find(|t| t.name == tool_name)
            .cloned()
    }

    /// All tools from non-hidden providers, sorted by name (direct
    /// bootstrap mode).
    pub fn visible_tools(&self) -> Vec<ToolDescriptor> {
        let snapshot = self.current();
        let hidden = self.hidden.read().expect("hidden lock");
        let mut tools: Vec<ToolDescriptor> = snapshot
            .tools_by_provider
            .iter()
            .filter(|(provider, _)| !hidden.contains(*provider))
            .flat_map(|(_, tools)| tools.iter().cloned())
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Top-`k` tools ranked by similarity to `query`, excluding
    /// `search_tool` itself. Deterministic given a fixed catalog.
    pub fn search(&self, query: &str, k: usize) -> Vec<SearchHit> {
        let snapshot = self.current();
        let mut hits = snapshot.index.search(query);
        hits.retain(|hit| hit.tool.name != SEARCH_TOOL_NAME);
        hits.truncate(k);
        hits
    }
}

// ---------------------------------------------------------------------------
// Search index
// ---------------------------------------------------------------------------

/// tf·idf document vectors over tool name + description tokens.
#[derive(Default)]
struct SearchIndex {
    tools: Vec<ToolDescriptor>,
    /// Per-tool sparse vector, token → weight, pre-normalized to unit length.
    vectors: Vec<HashMap<String, f64>>,
    /// token → document frequency.
    document_frequency: HashMap<String, usize>,
}

impl SearchIndex {
    fn build(tools: &[ToolDescriptor]) -> Self {
        let mut document_frequency: HashMap<String, usize> = HashMap::new();
        let token_docs: Vec<Vec<String>> = tools
            .iter()
            .map(|tool| tokenize(&format!("{} {}", tool.name, tool.description)))
            .collect();

        for tokens in &token_docs {
            let unique: HashSet<&String> = tokens.iter().collect();
            for token in unique {
                *document_frequency.entry(token.clone()).or_default() += 1;
            }
        }

        let total_docs = tools.len().max(1) as f64;
        let vectors = token_docs
            .iter()
            .map(|tokens| {
                let mut counts: HashMap<String, f64> = HashMap::new();
                for token in tokens {
                    *counts.entry(token.clone()).or_default() += 1.0;
                }
                let mut vector: HashMap<String, f64> = counts
                    .into_iter()
                    .map(|(token, tf)| {
                        let df = document_frequency.get(&token).copied().unwrap_or(0) as f64;
                        let idf = (1.0 + total_docs / (1.0 + df)).ln();
                        (token, tf * idf)
                    })
                    .collect();
                normalize(&mut vector);
                vector
            })
            .collect();

        Self {
            tools: tools.to_vec(),
            vectors,
            document_frequency,
        }
    }

    /// Rank every tool against `query`, highest first, name-tiebroken.
    fn search(&self, query: &str) -> Vec<SearchHit> {
        let tokens = tokenize(query);
        if tokens.is_empty() || self.tools.is_empty() {
            return Vec::new();
        }

        let total_docs = self.tools.len() as f64;
        let mut counts: HashMap<String, f64> = HashMap::new();
        for token in &tokens {
            *counts.entry(token.clone()).or_default() += 1.0;
        }
        let mut query_vector: HashMap<String, f64> = counts
            .into_iter()
            .map(|(token, tf)| {
                let df = self.document_frequency.get(&token).copied().unwrap_or(0) as f64;
                let idf = (1.0 + total_docs / (1.0 + df)).ln();
                (token, tf * idf)
            })
            .collect();
        normalize(&mut query_vector);

        let mut hits: Vec<SearchHit> = self
            .tools
            .iter()
            .zip(&self.vectors)
            .filter_map(|(tool, vector)| {
                let score = cosine(&query_vector, vector);
                (score > 0.0).then(|| SearchHit {
                    tool: tool.clone(),
                    score,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.tool.name.cmp(&b.tool.name))
        });
        hits
    }
}

/// Lowercased alphanumeric tokens of length ≥ 2, with snake_case split.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.len() >= 2)
        .map(str::to_string)
        .collect()
}

fn normalize(vector: &mut HashMap<String, f64>) {
    let norm = vector.values().map(|w| w * w).sum::<f64>().sqrt();
    if norm > 0.0 {
        for weight in vector.values_mut() {
            *weight /= norm;
        }
    }
}

/// Dot product of two unit vectors — cosine similarity in [0, 1].
fn cosine(a: &HashMap<String, f64>, b: &HashMap<String, f64>) -> f64 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    small
        .iter()
        .filter_map(|(token, weight)| large.get(token).map(|other| weight * other))
        .sum()
}

// ---------------------------------------------------------------------------
// Search-result rendering
// ---------------------------------------------------------------------------

/// Render hits into the `search_tool` outcome: a numbered human-readable
/// listing plus structured tool refs for the expansion handshake.
pub fn render_search_results(query: &str, hits: &[SearchHit]) -> (String, Value) {
    let mut text = format!("Found {} tools matching \"{}\":\n", hits.len(), query);
    let mut refs = Vec::with_capacity(hits.len());

    for (position, hit) in hits.iter().enumerate() {
        let tool = &hit.tool;
        text.push_str(&format!(
            "{}. {} ({}, score {:.2}) — {}\n",
            position + 1,
            tool.name,
            tool.provider_key,
            hit.score,
            tool.description,
        ));

        if tool.requires_detailed_schema {
            text.push_str(&format!("   Schema: {}\n", tool.input_schema));
        } else if let Some(summary) = summarize_parameters(&tool.input_schema) {
            text.push_str(&format!("   Parameters: {summary}\n"));
        }

        refs.push(json!({
            "name": tool.name,
            "provider": tool.provider_key,
            "score": hit.score,
        }));
    }

    (text, json!({ "tools": refs }))
}

/// Compact `name (type), …` summary of an object schema's properties.
fn summarize_parameters(schema: &Value) -> Option<String> {
    let properties = schema.get("properties")?.as_object()?;
    if properties.is_empty() {
        return None;
    }
    let required: HashSet<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut parts: Vec<String> = properties
        .iter()
        .map(|(name, prop)| {
            let kind = prop.get("type").and_then(Value::as_str).unwrap_or("any");
            if required.contains(name.as_str()) {
                format!("{name} ({kind}, required)")
            } else {
                format!("{name} ({kind})")
            }
        })
        .collect();
    parts.sort();
    Some(parts.join(", "))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tandem_adapters::InProcessAdapter;

    fn descriptor(name: &str, description: &str, provider: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.into(),
            description: description.into(),
            input_schema: json!({
                "type": "object",
                "properties": {"query": {"type": "string"}},
                "required": ["query"]
            }),
            provider_key: provider.into(),
            requires_detailed_schema: false,
        }
    }

    fn adapter_with(provider: &str, tools: Vec<ToolDescriptor>) -> Arc<dyn Adapter> {
        let mut builder = InProcessAdapter::builder(provider);
        for tool in tools {
            builder = builder.tool(
                tool,
                Box::new(|_| Box::pin(async { Ok(json!("ok")) })),
            );
        }
        Arc::new(builder.build())
    }

    async fn sample_catalog() -> ToolCatalog {
        let catalog = ToolCatalog::new();
        let adapters: Vec<Arc<dyn Adapter>> = vec![
            adapter_with(
                "gdrive",
                vec![
                    descriptor("gdrive_list_files", "List files in a Google Drive folder", "gdrive"),
                    descriptor("gdrive_download", "Download a file from Google Drive", "gdrive"),
                ],
            ),
            adapter_with(
                "gmail",
                vec![descriptor("gmail_search", "Search email messages in Gmail", "gmail")],
            ),
        ];
        catalog.refresh(&adapters).await.unwrap();
        catalog
    }

    #[tokio::test]
    async fn find_server_after_refresh() {
        let catalog = sample_catalog().await;
        assert_eq!(catalog.find_server("gmail_search").as_deref(), Some("gmail"));
        assert_eq!(
            catalog.find_server("gdrive_download").as_deref(),
            Some("gdrive")
        );
        assert!(catalog.find_server("nope").is_none());
    }

    #[tokio::test]
    async fn search_ranks_relevant_tools_first() {
        let catalog = sample_catalog().await;
        let hits = catalog.search("list files in drive", 5);
        assert!(!hits.is_empty());
        assert_eq!(hits[0].tool.name, "gdrive_list_files");
        for hit in &hits {
            assert!(hit.score > 0.0 && hit.score <= 1.0 + 1e-9);
        }
    }

    #[tokio::test]
    async fn search_is_deterministic() {
        let catalog = sample_catalog().await;
        let first: Vec<String> = catalog
            .search("drive files", 5)
            .into_iter()
            .map(|h| h.tool.name)
            .collect();
        let second: Vec<String> = catalog
            .search("drive files", 5)
            .into_iter()
            .map(|h| h.tool.name)
            .collect();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn hidden_providers_are_excluded_from_search() {
        let catalog = ToolCatalog::new();
        catalog.set_hidden_providers(["memory".to_string()]);
        let adapters: Vec<Arc<dyn Adapter>> = vec![adapter_with(
            "memory",
            vec![descriptor("memory_search_nodes", "Search the knowledge graph", "memory")],
        )];
        catalog.refresh(&adapters).await.unwrap();

        // Lookup still works; search never surfaces it.
        assert!(catalog.find_server("memory_search_nodes").is_some());
        assert!(catalog.search("search knowledge graph", 5).is_empty());
        assert!(catalog.visible_tools().is_empty());
    }

    #[tokio::test]
    async fn render_includes_numbered_lines_and_refs() {
        let catalog = sample_catalog().await;
        let hits = catalog.search("list drive files", 2);
        let (text, metadata) = render_search_results("list drive files", &hits);

        assert!(text.starts_with(&format!("Found {} tools", hits.len())));
        assert!(text.contains("1. "));
        assert!(text.contains("Parameters: query (string, required)"));

        let refs = metadata["tools"].as_array().unwrap();
        assert_eq!(refs.len(), hits.len());
        assert_eq!(refs[0]["name"], hits[0].tool.name.as_str());
    }

    #[tokio::test]
    async fn detailed_schema_is_inlined() {
        let catalog = ToolCatalog::new();
        let mut tool = descriptor("complex_tool", "A tool with a heavy schema", "demo");
        tool.requires_detailed_schema = true;
        let adapters: Vec<Arc<dyn Adapter>> = vec![adapter_with("demo", vec![tool])];
        catalog.refresh(&adapters).await.unwrap();

        let hits = catalog.search("heavy schema tool", 1);
        let (text, _) = render_search_results("heavy schema tool", &hits);
        assert!(text.contains("Schema: {"));
    }

    #[test]
    fn tokenizer_splits_snake_case() {
        let tokens = tokenize("gdrive_list_files");
        assert_eq!(tokens, vec!["gdrive", "list", "files"]);
    }
}
