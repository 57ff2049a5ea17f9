//! HTTP server for Tandem.
//!
//! One streaming chat endpoint (`POST /api/chat`, `text/event-stream`)
//! plus the management API: roles, scheduled jobs, OAuth token
//! registration, and the provider listing.

pub mod api;
pub mod chat;
pub mod server;
pub mod state;

pub use server::WebServer;
pub use state::{AppState, WebConfig};
