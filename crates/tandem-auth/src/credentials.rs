//! Credential file preparation for subprocess adapters.
//!
//! Google-OAuth subprocess providers expect an installed-application
//! credentials file under a stable name in their working directory. The
//! factory calls [`prepare_user_dir`] before spawning such a provider.

use std::path::{Path, PathBuf};

use serde_json::json;
use tracing::debug;

use crate::error::Result;

/// OAuth client settings for installed-application credentials.
#[derive(Debug, Clone)]
pub struct InstalledAppCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl InstalledAppCredentials {
    /// The JSON body Google tooling expects in a credentials file.
    fn to_json(&self) -> serde_json::Value {
        json!({
            "installed": {
                "client_id": self.client_id,
                "client_secret": self.client_secret,
                "auth_uri": "https://accounts.google.com/o/oauth2/auth",
                "token_uri": "https://oauth2.googleapis.com/token",
                "redirect_uris": ["http://localhost"]
            }
        })
    }
}

/// Create the working directory for (user, provider) and write the
/// provider's credentials file into it, if the provider declares one.
///
/// Returns the prepared directory.
pub async fn prepare_user_dir(
    base: &Path,
    user_id: &str,
    provider_key: &str,
    credentials_file: Option<&str>,
    credentials: Option<&InstalledAppCredentials>,
) -> Result<PathBuf> {
    let dir = base.join(user_id).join(provider_key);
    let dir_clone = dir.clone();
    let payload = match (credentials_file, credentials) {
        (Some(name), Some(creds)) => Some((name.to_string(), creds.to_json().to_string())),
        _ => None,
    };

    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        std::fs::create_dir_all(&dir_clone)?;
        if let Some((name, body)) = payload {
            std::fs::write(dir_clone.join(name), body)?;
        }
        Ok(())
    })
    .await
    .map_err(|e| std::io::Error::other(e.to_string()))??;

    debug!(user_id, provider_key, dir = %dir.display(), "prepared adapter working directory");
    Ok(dir)
}

// ── tests ────────────────────────────────────────────────────────────
