//! Core adapter trait and supporting types.
//!
//! Every capability provider — a child process speaking JSON over stdio or
//! a function table inside this process — implements the [`Adapter`] trait,
//! giving the orchestrator one uniform surface to discover and invoke tools.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

// ---------------------------------------------------------------------------
// Provider descriptors
// ---------------------------------------------------------------------------

/// How a provider's adapter runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// A child process speaking line-oriented JSON on its standard I/O.
    Subprocess,
    /// A function table within this process.
    InProcess,
}

/// What credential a provider needs before it can be constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthRequirement {
    None,
    OauthGoogle,
    ApiKey,
}

/// Whether a provider's tools are offered to the model's tool search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Internal plumbing (memory, scheduler); never listed in search results.
    Hidden,
    /// Discoverable through `search_tool`.
    UserVisible,
}

/// The principal an adapter instance is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderScope {
    /// One instance per user.
    Global,
    /// One instance per (user, role) — memory and scheduler.
    PerRole,
    /// One instance per (user, account email).
    PerAccount,
}

/// Static description of a capability source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    /// Stable key (e.g. `gmail`, `memory`).
    pub key: String,
    /// Human-readable name.
    pub display_name: String,
    pub transport: Transport,
    /// Command and arguments, for subprocess providers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    pub auth: AuthRequirement,
    pub visibility: Visibility,
    pub scope: ProviderScope,
    /// File name for installed-app OAuth credentials written into the
    /// working directory before spawn (Google subprocess providers).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_file: Option<String>,
}

// ---------------------------------------------------------------------------
// Tools and outcomes
// ---------------------------------------------------------------------------

/// A tool exposed by a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name, unique within its provider.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema describing the input parameters.
    pub input_schema: Value,
    /// The provider this tool belongs to.
    pub provider_key: String,
    /// When set, `search_tool` results include the full schema instead of
    /// a parameter summary.
    #[serde(default)]
    pub requires_detailed_schema: bool,
}

/// The tagged payload of a completed tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContent {
    /// The tool produced text.
    Text { text: String },
    /// The tool reported a failure the model can react to.
    Error { message: String },
}

/// Result of a tool call, with optional annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub content: ToolContent,
    /// Structured side-channel (e.g. tool refs from `search_tool`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Account emails this result concerns, for the client UI.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accounts: Vec<String>,
}

impl ToolOutcome {
    /// A plain text outcome.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: ToolContent::Text { text: text.into() },
            metadata: None,
            accounts: Vec::new(),
        }
    }

    /// An error outcome the conversation can carry forward.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: ToolContent::Error {
                message: message.into(),
            },
            metadata: None,
            accounts: Vec::new(),
        }
    }

    /// Attach structured metadata.
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Attach account annotations.
    pub fn with_accounts(mut self, accounts: Vec<String>) -> Self {
        self.accounts = accounts;
        self
    }

    pub fn is_error(&self) -> bool {
        matches!(self.content, ToolContent::Error { .. })
    }

    /// The text to feed back to the model, for either variant.
    pub fn render(&self) -> &str {
        match &self.content {
            ToolContent::Text { text } => text,
            ToolContent::Error { message } => message,
        }
    }
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

/// A resource a provider can serve by URI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub uri: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

/// The bytes of a read resource.
#[derive(Debug, Clone)]
pub struct ResourceContent {
    pub bytes: Vec<u8>,
    pub media_type: String,
}

// ---------------------------------------------------------------------------
// Core trait
// ---------------------------------------------------------------------------

/// The uniform capability interface.
///
/// Adapters are shared behind `Arc` from the factory cache, so all methods
/// take `&self`; implementations use interior mutability for connection
/// state.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// The provider key this adapter instance serves.
    fn provider_key(&self) -> &str;

    /// Establish the connection (spawn the child, open the store).
    async fn connect(&self) -> Result<()>;

    /// Ordered list of tools currently exposed.
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>>;

    /// Invoke a named tool. Tool-reported failures come back as an
    /// error-tagged [`ToolOutcome`], not as `Err`.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutcome>;

    /// Resources this provider can serve (possibly empty).
    async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>>;

    /// Read one resource by URI.
    async fn read_resource(&self, uri: &str) -> Result<ResourceContent>;

    /// Whether the transport is currently usable.
    async fn is_connected(&self) -> bool;

    /// Re-establish a dropped transport (re-spawn for subprocesses).
    async fn reconnect(&self) -> Result<()>;

    /// Terminate the adapter and release its transport.
    async fn close(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_render_covers_both_variants() {
        assert_eq!(ToolOutcome::text("ok").render(), "ok");
        assert_eq!(ToolOutcome::error("bad").render(), "bad");
        assert!(ToolOutcome::error("bad").is_error());
        assert!(!ToolOutcome::text("ok").is_error());
    }

    #[test]
    fn outcome_serializes_tagged() {
        let outcome = ToolOutcome::text("hi").with_accounts(vec!["a@example.com".into()]);
        let v = serde_json::to_value(&outcome).unwrap();
        assert_eq!(v["content"]["type"], "text");
        assert_eq!(v["content"]["text"], "hi");
        assert_eq!(v["accounts"][0], "a@example.com");
    }

    #[test]
    fn descriptor_roundtrip() {
        let descriptor = ProviderDescriptor {
            key: "gmail".into(),
            display_name: "Gmail".into(),
            transport: Transport::Subprocess,
            command: vec!["gmail-adapter".into()],
            auth: AuthRequirement::OauthGoogle,
            visibility: Visibility::UserVisible,
            scope: ProviderScope::PerAccount,
            credentials_file: Some("gcp-oauth.keys.json".into()),
        };
        let json = serde_json::to_string(&descriptor).unwrap();
        let back: ProviderDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back.key, "gmail");
        assert_eq!(back.transport, Transport::Subprocess);
    }
}
