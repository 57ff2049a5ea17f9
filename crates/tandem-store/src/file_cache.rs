//! On-disk file cache for previewable artifacts.
//!
//! The cache directory holds files named `{cacheId}.{ext}` where a cache id
//! matches `[A-Za-z0-9_-]+`. Tool results reference entries by id (preview
//! links, Gmail cache markers) and the URI resolver turns ids back into
//! absolute paths. Every path produced here is checked to stay inside the
//! cache root.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};

static CACHE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("static regex"));

/// Check a candidate string against the cache-id grammar.
pub fn is_valid_cache_id(candidate: &str) -> bool {
    CACHE_ID_RE.is_match(candidate)
}

/// A directory of cache files keyed by id.
#[derive(Debug, Clone)]
pub struct FileCache {
    root: PathBuf,
}

impl FileCache {
    /// Create a cache rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root: PathBuf = root.into();
        std::fs::create_dir_all(&root)?;
        // Canonicalize once so later containment checks compare against a
        // stable, symlink-free prefix.
        let root = root.canonicalize()?;
        Ok(Self { root })
    }

    /// The canonicalized cache root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `bytes` under `{id}.{ext}` and return the absolute path.
    pub async fn write(&self, id: &str, ext: &str, bytes: Vec<u8>) -> StoreResult<PathBuf> {
        let path = self.path_for(id, ext)?;
        let write_path = path.clone();
        tokio::task::spawn_blocking(move || std::fs::write(&write_path, bytes))
            .await
            .map_err(|e| StoreError::Background(e.to_string()))??;
        debug!(id, ext, "cache file written");
        Ok(path)
    }

    /// Write a UTF-8 string under `{id}.{ext}`.
    pub async fn write_string(&self, id: &str, ext: &str, text: &str) -> StoreResult<PathBuf> {
        self.write(id, ext, text.as_bytes().to_vec()).await
    }

    /// Read the contents of the cache entry `id` (any extension).
    pub async fn read(&self, id: &str) -> StoreResult<Vec<u8>> {
        let path = self.resolve(id)?;
        tokio::task::spawn_blocking(move || std::fs::read(&path))
            .await
            .map_err(|e| StoreError::Background(e.to_string()))?
            .map_err(StoreError::from)
    }

    /// Resolve a cache id to the absolute path of its file.
    ///
    /// Fails if the id does not satisfy the grammar, if no file with that
    /// stem exists, or if the resolved path escapes the cache root.
    pub fn resolve(&self, id: &str) -> StoreResult<PathBuf> {
        if !is_valid_cache_id(id) {
            return Err(StoreError::InvalidCacheId(id.to_string()));
        }

        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            let stem_matches = path
                .file_stem()
                .and_then(|s| s.to_str())
                .is_some_and(|stem| stem == id);
            if stem_matches && path.is_file() {
                return self.contain(path);
            }
        }

        Err(StoreError::NotFound {
            entity: "cache_file",
            id: id.to_string(),
        })
    }

    /// Whether an entry for `id` exists.
    pub fn exists(&self, id: &str) -> bool {
        self.resolve(id).is_ok()
    }

    /// Build (and containment-check) the path `{root}/{id}.{ext}` without
    /// requiring the file to exist yet.
    pub fn path_for(&self, id: &str, ext: &str) -> StoreResult<PathBuf> {
        if !is_valid_cache_id(id) {
            return Err(StoreError::InvalidCacheId(id.to_string()));
        }
        // Extensions are caller-controlled but must stay a single component.
        if ext.is_empty() || ext.contains(['/', '\\', '.']) {
            return Err(StoreError::Rejected(format!(
                "invalid cache extension `{ext}`"
            )));
        }
        self.contain(self.root.join(format!("{id}.{ext}")))
    }

    /// Verify `path` normalizes to a location under the cache root.
    fn contain(&self, path: PathBuf) -> StoreResult<PathBuf> {
        // The file may not exist yet, so canonicalize the parent instead.
        let parent = path
            .parent()
            .ok_or_else(|| StoreError::InvalidCacheId(path.display().to_string()))?;
        let canonical_parent = parent.canonicalize()?;
        if canonical_parent != self.root {
            warn!(path = %path.display(), "cache path escaped the root");
            return Err(StoreError::InvalidCacheId(path.display().to_string()));
        }
        Ok(path)
    }
}

// ── tests ────────────────────────────────────────────────────────────
