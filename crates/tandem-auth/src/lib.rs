//! Credential handling for Tandem.
//!
//! Token refresh with a pre-expiry buffer, persisted-before-use semantics,
//! and credential file preparation for subprocess adapters. The OAuth
//! authorization flow itself (consent screens, callbacks) lives outside the
//! runtime; this crate only consumes its stored results.

pub mod credentials;
pub mod error;
pub mod refresh;

pub use credentials::{InstalledAppCredentials, prepare_user_dir};
pub use error::{AuthError, Result};
pub use refresh::{
    HttpRefresher, REFRESH_BUFFER_SECS, RefreshedToken, TokenRefresher, TokenService,
    needs_refresh,
};
