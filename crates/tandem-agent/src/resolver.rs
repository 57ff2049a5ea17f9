//! Argument URI resolver.
//!
//! Before an adapter call, every string leaf in the arguments is translated
//! from user-visible handles to concrete local paths:
//!
//! 1. a Google Drive URL with an extractable file id — downloaded once into
//!    the file cache under that id, then rewritten to `file://…`;
//! 2. `cache://{id}`, a preview-URL prefix, or a bare id already present in
//!    the cache — rewritten to the cached file's `file://` path;
//! 3. anything else passes through unchanged.
//!
//! Every produced path comes out of [`FileCache::resolve`], which enforces
//! the id grammar and the cache-root containment check, so traversal
//! attempts fall through to passthrough or are rejected outright.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use tandem_store::{FileCache, is_valid_cache_id};

use crate::error::Result;

/// Prefixes the client uses for preview links; stripping one leaves a
/// cache id.
const PREVIEW_PREFIXES: &[&str] = &["/api/preview/", "preview://", "cache://"];

/// Extract the file id from a Google Drive / Docs URL, if any.
///
/// Understands `drive.google.com/file/d/{id}/…`,
/// `drive.google.com/open?id={id}`, and `docs.google.com/<kind>/d/{id}/…`.
pub fn drive_file_id(candidate: &str) -> Option<String> {
    let parsed = Url::parse(candidate).ok()?;
    let host = parsed.host_str()?;
    if host != "drive.google.com" && host != "docs.google.com" {
        return None;
    }

    // `?id={id}` form.
    if let Some((_, id)) = parsed.query_pairs().find(|(key, _)| key == "id")
        && is_valid_cache_id(&id)
    {
        return Some(id.into_owned());
    }

    // `…/d/{id}/…` form.
    let segments: Vec<&str> = parsed.path_segments()?.collect();
    let id = segments
        .iter()
        .position(|segment| *segment == "d")
        .and_then(|position| segments.get(position + 1))?;
    is_valid_cache_id(id).then(|| id.to_string())
}

/// Downloads a Drive file on behalf of a user (implemented against the
/// auth collaborator; mocked in tests).
#[async_trait]
pub trait DriveFetcher: Send + Sync {
    /// Fetch the file's bytes and a filename extension (e.g. `pdf`).
    async fn fetch(&self, user_id: &str, file_id: &str) -> Result<(Vec<u8>, String)>;
}

/// Translates argument string leaves into cache-backed local paths.
pub struct UriResolver {
    cache: FileCache,
    fetcher: Option<Arc<dyn DriveFetcher>>,
}

impl UriResolver {
    pub fn new(cache: FileCache, fetcher: Option<Arc<dyn DriveFetcher>>) -> Self {
        Self { cache, fetcher }
    }

    /// Resolve every string leaf of `arguments` for `user_id`.
    pub async fn resolve_arguments(&self, arguments: &Value, user_id: &str) -> Value {
        match arguments {
            Value::String(s) => Value::String(self.resolve_str(s, user_id).await),
            Value::Object(map) => {
                let mut resolved = serde_json::Map::with_capacity(map.len());
                for (key, value) in map {
                    resolved.insert(key.clone(), Box::pin(self.resolve_arguments(value, user_id)).await);
                }
                Value::Object(resolved)
            }
            Value::Array(items) => {
                let mut resolved = Vec::with_capacity(items.len());
                for item in items {
                    resolved.push(Box::pin(self.resolve_arguments(item, user_id)).await);
                }
                Value::Array(resolved)
            }
            other => other.clone(),
        }
    }

    /// Resolve one string leaf.
    async fn resolve_str(&self, candidate: &str, user_id: &str) -> String {
        // (i) Drive URL → download once, then serve from the cache.
        if let Some(file_id) = drive_file_id(candidate) {
            match self.materialize_drive_file(user_id, &file_id).await {
                Ok(path) => return path,
                Err(e) => {
                    warn!(file_id, error = %e, "drive download failed; passing url through");
                    return candidate.to_string();
                }
            }
        }

        // (ii)/(iii) explicit cache reference or preview link → cache path.
        if let Some(id) = PREVIEW_PREFIXES
            .iter()
            .find_map(|prefix| candidate.strip_prefix(prefix))
        {
            if let Ok(path) = self.cache.resolve(id) {
                return format!("file://{}", path.display());
            }
            // An explicit reference that fails the grammar or is missing
            // stays as-is; the adapter will report it.
            return candidate.to_string();
        }

        // (ii) bare id — only when the cache actually holds it, so ordinary
        // words pass through untouched.
        if is_valid_cache_id(candidate) {
            if let Ok(path) = self.cache.resolve(candidate) {
                debug!(id = candidate, "bare cache id resolved");
                return format!("file://{}", path.display());
            }
        }

        // (iv) passthrough.
        candidate.to_string()
    }

    /// Ensure the Drive file is in the cache, fetching it on first use.
    async fn materialize_drive_file(&self, user_id: &str, file_id: &str) -> Result<String> {
        if let Ok(path) = self.cache.resolve(file_id) {
            return Ok(format!("file://{}", path.display()));
        }

        let fetcher = self.fetcher.as_ref().ok_or_else(|| {
            crate::error::AgentError::Internal("no drive fetcher configured".into())
        })?;
        let (bytes, ext) = fetcher.fetch(user_id, file_id).await?;
        let path = self.cache.write(file_id, &ext, bytes).await?;
        Ok(format!("file://{}", path.display()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
