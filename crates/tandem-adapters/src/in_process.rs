//! In-process adapter.
//!
//! Wraps a function table within the same process. Each tool is an async
//! function of `(arguments) -> Result<Value, String>`; whatever shape the
//! function returns is normalized into the tagged [`ToolOutcome`]:
//! a plain string, a `{type, text}` object, or an object carrying a
//! `content[]` array. In-process adapters are connected the moment they
//! are constructed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use crate::error::{AdapterError, Result};
use crate::traits::{
    Adapter, ResourceContent, ResourceDescriptor, ToolDescriptor, ToolOutcome,
};

/// An async tool handler. Returns either a result value (normalized into
/// the outcome) or an error message surfaced as an error outcome.
pub type ToolFn =
    Box<dyn Fn(Value) -> BoxFuture<'static, std::result::Result<Value, String>> + Send + Sync>;

/// Normalize a raw handler return value into a [`ToolOutcome`].
///
/// Accepted shapes, in order:
/// - a JSON string → text outcome;
/// - `{"type": "text", "text": …}` → text outcome;
/// - `{"content": [{…,"text": …}, …]}` → text items joined by newlines;
/// - anything else → its JSON rendering as text.
///
/// Top-level `metadata` and `accounts` fields are carried over as
/// annotations, and `{"type": "error", …}` marks an error outcome.
pub(crate) fn normalize_outcome(value: Value) -> ToolOutcome {
    let metadata = value.get("metadata").cloned();
    let accounts: Vec<String> = value
        .get("accounts")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    let is_error = value.get("type").and_then(Value::as_str) == Some("error");

    let text = if let Some(s) = value.as_str() {
        s.to_string()
    } else if let Some(t) = value.get("text").and_then(Value::as_str) {
        t.to_string()
    } else if let Some(message) = value.get("message").and_then(Value::as_str) {
        message.to_string()
    } else if let Some(content) = value.get("content").and_then(Value::as_array) {
        content
            .iter()
            .filter_map(|item| {
                item.get("text")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or_else(|| item.as_str().map(str::to_string))
            })
            .collect::<Vec<_>>()
            .join("\n")
    } else {
        value.to_string()
    };

    let mut outcome = if is_error {
        ToolOutcome::error(text)
    } else {
        ToolOutcome::text(text)
    };
    if let Some(metadata) = metadata {
        outcome = outcome.with_metadata(metadata);
    }
    if !accounts.is_empty() {
        outcome = outcome.with_accounts(accounts);
    }
    outcome
}

/// Adapter over a table of in-process tool functions.
pub struct InProcessAdapter {
    key: String,
    tools: Vec<ToolDescriptor>,
    handlers: HashMap<String, ToolFn>,
    connected: AtomicBool,
}

impl InProcessAdapter {
    /// Start building an adapter for `provider_key`.
    pub fn builder(provider_key: impl Into<String>) -> InProcessAdapterBuilder {
        InProcessAdapterBuilder {
            key: provider_key.into(),
            tools: Vec::new(),
            handlers: HashMap::new(),
        }
    }
}

/// Builder collecting (descriptor, handler) pairs.
pub struct InProcessAdapterBuilder {
    key: String,
    tools: Vec<ToolDescriptor>,
    handlers: HashMap<String, ToolFn>,
}

impl InProcessAdapterBuilder {
    /// Register one tool. The descriptor's `provider_key` is overwritten
    /// with this adapter's key.
    pub fn tool(mut self, mut descriptor: ToolDescriptor, handler: ToolFn) -> Self {
        descriptor.provider_key = self.key.clone();
        self.handlers.insert(descriptor.name.clone(), handler);
        self.tools.push(descriptor);
        self
    }

    pub fn build(self) -> InProcessAdapter {
        InProcessAdapter {
            key: self.key,
            tools: self.tools,
            handlers: self.handlers,
            // In-process adapters are live from construction.
            connected: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl Adapter for InProcessAdapter {
    fn provider_key(&self) -> &str {
        &self.key
    }

    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        Ok(self.tools.clone())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutcome> {
        let handler = self
            .handlers
            .get(name)
            .ok_or_else(|| AdapterError::UnknownTool {
                provider: self.key.clone(),
                tool_name: name.to_string(),
            })?;

        debug!(provider = %self.key, tool = name, "invoking in-process tool");
        match handler(arguments).await {
            Ok(value) => Ok(normalize_outcome(value)),
            Err(message) => Ok(ToolOutcome::error(message)),
        }
    }

    async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>> {
        Ok(Vec::new())
    }

    async fn read_resource(&self, uri: &str) -> Result<ResourceContent> {
        Err(AdapterError::Resource {
            provider: self.key.clone(),
            uri: uri.to_string(),
            reason: "in-process adapters expose no resources".into(),
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

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_descriptor() -> ToolDescriptor {
        ToolDescriptor {
            name: "echo".into(),
            description: "Echoes its input".into(),
            input_schema: json!({"type": "object"}),
            provider_key: String::new(),
            requires_detailed_schema: false,
        }
    }

    fn adapter() -> InProcessAdapter {
        InProcessAdapter::builder("demo")
            .tool(
                echo_descriptor(),
                Box::new(|args| {
                    Box::pin(async move {
                        Ok(json!({"type": "text", "text": format!("echo: {args}")}))
                    })
                }),
            )
            .build()
    }

    #[tokio::test]
    async fn connected_on_construction() {
        let adapter = adapter();
        assert!(adapter.is_connected().await);
    }

    #[tokio::test]
    async fn call_known_tool() {
        let adapter = adapter();
        let outcome = adapter.call_tool("echo", json!({"x": 1})).await.unwrap();
        assert!(!outcome.is_error());
        assert!(outcome.render().starts_with("echo:"));
    }

    #[tokio::test]
    async fn unknown_tool_is_caller_fault() {
        let adapter = adapter();
        let result = adapter.call_tool("missing", json!({})).await;
        assert!(matches!(result, Err(AdapterError::UnknownTool { .. })));
    }

    #[tokio::test]
    async fn handler_error_becomes_error_outcome() {
        let adapter = InProcessAdapter::builder("demo")
            .tool(
                echo_descriptor(),
                Box::new(|_| Box::pin(async { Err("boom".to_string()) })),
            )
            .build();
        let outcome = adapter.call_tool("echo", json!({})).await.unwrap();
        assert!(outcome.is_error());
        assert_eq!(outcome.render(), "boom");
    }

    #[test]
    fn normalize_plain_string() {
        let outcome = normalize_outcome(json!("hello"));
        assert_eq!(outcome.render(), "hello");
    }

    #[test]
    fn normalize_typed_text() {
        let outcome = normalize_outcome(json!({"type": "text", "text": "hi"}));
        assert_eq!(outcome.render(), "hi");
        assert!(!outcome.is_error());
    }

    #[test]
    fn normalize_content_array() {
        let outcome = normalize_outcome(json!({
            "content": [
                {"type": "text", "text": "line one"},
                {"type": "text", "text": "line two"}
            ]
        }));
        assert_eq!(outcome.render(), "line one\nline two");
    }

    #[test]
    fn normalize_error_with_annotations() {
        let outcome = normalize_outcome(json!({
            "type": "error",
            "message": "denied",
            "metadata": {"code": 403},
            "accounts": ["a@example.com"]
        }));
        assert!(outcome.is_error());
        assert_eq!(outcome.render(), "denied");
        assert_eq!(outcome.metadata.as_ref().unwrap()["code"], 403);
        assert_eq!(outcome.accounts, vec!["a@example.com"]);
    }

    #[test]
    fn normalize_fallback_serializes_value() {
        let outcome = normalize_outcome(json!({"rows": [1, 2, 3]}));
        assert!(outcome.render().contains("[1,2,3]"));
    }
}
