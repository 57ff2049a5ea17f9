//! Provider wiring.
//!
//! Pairs the static provider catalog with concrete construction recipes:
//! subprocess descriptors register as-is, and each in-process provider key
//! gets its factory function here. This is the only place that knows how
//! every adapter is actually built.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use tandem_adapters::{
    Adapter, AdapterError, InProcessAdapter, MemoryAdapter, ProviderRegistry, ToolDescriptor,
    Transport, builtin_providers,
};
use tandem_agent::DriveFetcher;
use tandem_auth::TokenService;
use tandem_jobs::scheduler_adapter;
use tandem_store::{JobStore, MemoryGraph};

/// Build the provider registry with every built-in provider wired.
pub fn build_registry(jobs: JobStore) -> ProviderRegistry {
    let registry = ProviderRegistry::new();

    for descriptor in builtin_providers() {
        match descriptor.transport {
            Transport::Subprocess => registry.register_subprocess(descriptor),
            Transport::InProcess => {
                let key = descriptor.key.clone();
                match key.as_str() {
                    "memory" => registry.register_in_process(
                        descriptor,
                        Arc::new(|ctx| {
                            Box::pin(async move {
                                let db_path = ctx.token_data["db_path"]
                                    .as_str()
                                    .ok_or_else(|| AdapterError::Fatal {
                                        provider: "memory".into(),
                                        reason: "missing db_path in token data".into(),
                                    })?
                                    .to_string();
                                let graph = Arc::new(MemoryGraph::open(&db_path).await?);
                                let role = ctx.role_id.unwrap_or_default();
                                Ok(Arc::new(MemoryAdapter::new(role, graph)) as Arc<dyn Adapter>)
                            })
                        }),
                    ),
                    "scheduler" => {
                        let jobs = jobs.clone();
                        registry.register_in_process(
                            descriptor,
                            Arc::new(move |ctx| {
                                let jobs = jobs.clone();
                                Box::pin(async move {
                                    Ok(Arc::new(scheduler_adapter(
                                        jobs,
                                        ctx.user_id,
                                        ctx.role_id,
                                    )) as Arc<dyn Adapter>)
                                })
                            }),
                        )
                    }
                    "alpha_vantage" => registry.register_in_process(
                        descriptor,
                        Arc::new(|ctx| {
                            Box::pin(async move {
                                let api_key = ctx.token_data["api_key"]
                                    .as_str()
                                    .unwrap_or_default()
                                    .to_string();
                                Ok(Arc::new(alpha_vantage_adapter(api_key)) as Arc<dyn Adapter>)
                            })
                        }),
                    ),
                    "markdown" => registry.register_in_process(
                        descriptor,
                        Arc::new(|_ctx| {
                            Box::pin(
                                async move { Ok(Arc::new(markdown_adapter()) as Arc<dyn Adapter>) },
                            )
                        }),
                    ),
                    other => {
                        debug!(provider = other, "in-process provider has no factory; skipped")
                    }
                }
            }
        }
    }

    registry
}

fn tool(name: &str, description: &str, schema: Value) -> ToolDescriptor {
    ToolDescriptor {
        name: name.into(),
        description: description.into(),
        input_schema: schema,
        provider_key: String::new(),
        requires_detailed_schema: false,
    }
}

/// Stock quote tools over the Alpha Vantage REST API.
fn alpha_vantage_adapter(api_key: String) -> InProcessAdapter {
    InProcessAdapter::builder("alpha_vantage")
        .tool(
            tool(
                "globalQuote",
                "Get the latest stock quote for a ticker symbol",
                json!({
                    "type": "object",
                    "properties": {
                        "symbol": {"type": "string", "description": "Ticker symbol, e.g. AAPL"}
                    },
                    "required": ["symbol"]
                }),
            ),
            Box::new(move |args| {
                let api_key = api_key.clone();
                Box::pin(async move {
                    let symbol = args
                        .get("symbol")
                        .and_then(Value::as_str)
                        .ok_or_else(|| "missing `symbol`".to_string())?;
                    let url = format!(
                        "https://www.alphavantage.co/query?function=GLOBAL_QUOTE&symbol={symbol}&apikey={api_key}"
                    );
                    let body: Value = reqwest::get(&url)
                        .await
                        .map_err(|e| format!("quote request failed: {e}"))?
                        .json()
                        .await
                        .map_err(|e| format!("quote response unreadable: {e}"))?;
                    Ok(json!({
                        "type": "text",
                        "text": body["Global Quote"].to_string()
                    }))
                })
            }),
        )
        .build()
}

/// Local-file markdown conversion. Heavy lifting (code-block extraction,
/// caching) happens in the orchestrator's post-processor.
fn markdown_adapter() -> InProcessAdapter {
    InProcessAdapter::builder("markdown")
        .tool(
            tool(
                "convert_to_markdown",
                "Convert a local document to markdown",
                json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string", "description": "Path or cached file reference"}
                    },
                    "required": ["path"]
                }),
            ),
            Box::new(|args| {
                Box::pin(async move {
                    let path = args
                        .get("path")
                        .and_then(Value::as_str)
                        .ok_or_else(|| "missing `path`".to_string())?;
                    let local = path.strip_prefix("file://").unwrap_or(path).to_string();
                    let contents = tokio::fs::read_to_string(&local)
                        .await
                        .map_err(|e| format!("cannot read `{local}`: {e}"))?;
                    Ok(json!({ "type": "text", "text": contents }))
                })
            }),
        )
        .build()
}

// ---------------------------------------------------------------------------
// Drive fetcher
// ---------------------------------------------------------------------------

/// Downloads Drive files with the user's OAuth token, for the URI
/// resolver.
pub struct HttpDriveFetcher {
    tokens: Arc<TokenService>,
    http: reqwest::Client,
}

impl HttpDriveFetcher {
    pub fn new(tokens: Arc<TokenService>) -> Self {
        Self {
            tokens,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl DriveFetcher for HttpDriveFetcher {
    async fn fetch(
        &self,
        user_id: &str,
        file_id: &str,
    ) -> tandem_agent::Result<(Vec<u8>, String)> {
        let token = self.tokens.fresh_token(user_id, "gdrive", None).await?;
        let url = format!("https://www.googleapis.com/drive/v3/files/{file_id}?alt=media");
        let response = self
            .http
            .get(&url)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .map_err(|e| tandem_agent::AgentError::Internal(format!("drive fetch failed: {e}")))?;

        let ext = match response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
        {
            t if t.starts_with("application/pdf") => "pdf",
            t if t.starts_with("text/plain") => "txt",
            t if t.starts_with("text/html") => "html",
            t if t.starts_with("application/json") => "json",
            _ => "bin",
        }
        .to_string();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| tandem_agent::AgentError::Internal(format!("drive body failed: {e}")))?;
        Ok((bytes.to_vec(), ext))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
