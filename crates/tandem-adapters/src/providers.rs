//! Built-in provider descriptor catalog.
//!
//! The static list of capability sources this deployment knows about. The
//! composition root registers each of these with the [`crate::registry`],
//! pairing in-process entries with their factory functions.

use crate::traits::{
    AuthRequirement, ProviderDescriptor, ProviderScope, Transport, Visibility,
};

/// File name for installed-app OAuth credentials expected by the Google
/// subprocess adapters.
pub const GOOGLE_CREDENTIALS_FILE: &str = "gcp-oauth.keys.json";

/// The built-in provider catalog.
pub fn builtin_providers() -> Vec<ProviderDescriptor> {
    vec![
        ProviderDescriptor {
            key: "memory".into(),
            display_name: "Memory".into(),
            transport: Transport::InProcess,
            command: Vec::new(),
            auth: AuthRequirement::None,
            visibility: Visibility::Hidden,
            scope: ProviderScope::PerRole,
            credentials_file: None,
        },
        ProviderDescriptor {
            key: "scheduler".into(),
            display_name: "Scheduler".into(),
            transport: Transport::InProcess,
            command: Vec::new(),
            auth: AuthRequirement::None,
            visibility: Visibility::Hidden,
            scope: ProviderScope::PerRole,
            credentials_file: None,
        },
        ProviderDescriptor {
            key: "gmail".into(),
            display_name: "Gmail".into(),
            transport: Transport::Subprocess,
            command: vec!["tandem-gmail-adapter".into()],
            auth: AuthRequirement::OauthGoogle,
            visibility: Visibility::UserVisible,
            scope: ProviderScope::PerAccount,
            credentials_file: Some(GOOGLE_CREDENTIALS_FILE.into()),
        },
        ProviderDescriptor {
            key: "gdrive".into(),
            display_name: "Google Drive".into(),
            transport: Transport::Subprocess,
            command: vec!["tandem-gdrive-adapter".into()],
            auth: AuthRequirement::OauthGoogle,
            visibility: Visibility::UserVisible,
            scope: ProviderScope::PerAccount,
            credentials_file: Some(GOOGLE_CREDENTIALS_FILE.into()),
        },
        ProviderDescriptor {
            key: "alpha_vantage".into(),
            display_name: "Alpha Vantage".into(),
            transport: Transport::InProcess,
            command: Vec::new(),
            auth: AuthRequirement::ApiKey,
            visibility: Visibility::UserVisible,
            scope: ProviderScope::Global,
            credentials_file: None,
        },
        ProviderDescriptor {
            key: "markdown".into(),
            display_name: "Markdown Tools".into(),
            transport: Transport::InProcess,
            command: Vec::new(),
            auth: AuthRequirement::None,
            visibility: Visibility::UserVisible,
            scope: ProviderScope::Global,
            credentials_file: None,
        },
    ]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_keys_are_unique() {
        let providers = builtin_providers();
        let mut keys: Vec<_> = providers.iter().map(|p| p.key.as_str()).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), providers.len());
    }

    #[test]
    fn google_providers_declare_credentials_file() {
        for provider in builtin_providers() {
            if provider.auth == AuthRequirement::OauthGoogle
                && provider.transport == Transport::Subprocess
            {
                assert_eq!(
                    provider.credentials_file.as_deref(),
                    Some(GOOGLE_CREDENTIALS_FILE),
                    "provider {} missing credentials file",
                    provider.key
                );
            }
        }
    }

    #[test]
    fn per_role_providers_are_hidden_in_process() {
        for provider in builtin_providers() {
            if provider.scope == ProviderScope::PerRole {
                assert_eq!(provider.transport, Transport::InProcess);
                assert_eq!(provider.visibility, Visibility::Hidden);
            }
        }
    }
}
