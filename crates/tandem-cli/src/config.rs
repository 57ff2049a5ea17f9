//! Server configuration.
//!
//! Loaded from an optional TOML file with environment overrides for
//! secrets (`ANTHROPIC_API_KEY`, `GOOGLE_CLIENT_ID`, `GOOGLE_CLIENT_SECRET`).

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TandemConfig {
    /// Directory for the database, file cache, memory graphs, and adapter
    /// working directories. Defaults to `./data`.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub model: ModelSection,

    #[serde(default)]
    pub google: Option<GoogleSection>,

    /// User attributed to requests without an identity header.
    #[serde(default)]
    pub default_user: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelSection {
    #[serde(default = "default_model")]
    pub model: String,
    /// Usually left unset in the file; read from `ANTHROPIC_API_KEY`.
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleSection {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
}

fn default_bind_addr() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    8080
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}

impl TandemConfig {
    /// Load from `path` (missing file means defaults), then apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(path)?;
                toml::from_str(&raw)?
            }
            _ => Self::default(),
        };

        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            config.model.api_key = Some(key);
        }
        if let (Ok(id), Ok(secret)) = (
            std::env::var("GOOGLE_CLIENT_ID"),
            std::env::var("GOOGLE_CLIENT_SECRET"),
        ) {
            config.google = Some(GoogleSection {
                client_id: id,
                client_secret: Some(secret),
            });
        }

        Ok(config)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| "data".into())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
