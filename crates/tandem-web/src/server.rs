//! Main web server setup and startup.
//!
//! [`WebServer`] composes the Axum router, registers all routes, and
//! starts the HTTP listener.

use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderValue, Method};
use axum::routing::{delete, get, post, put};
use tower_http::cors::CorsLayer;

use crate::api;
use crate::chat;
use crate::state::{AppState, WebConfig};

/// The Tandem web server.
pub struct WebServer {
    config: WebConfig,
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(config: WebConfig, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    /// The `host:port` string this server will bind to.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.config.bind_addr, self.config.port)
    }

    /// Build the Axum router with all routes registered.
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin("*".parse::<HeaderValue>().expect("static header"))
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers(tower_http::cors::Any);

        Router::new()
            .route("/api/status", get(api::status))
            .route("/api/providers", get(api::list_providers))
            .route("/api/providers/{key}/config", post(api::set_provider_config))
            .route(
                "/api/providers/{key}/config",
                delete(api::delete_provider_config),
            )
            // Streaming chat.
            .route("/api/chat", post(chat::chat))
            // Message history.
            .route("/api/messages", get(api::list_messages))
            .route("/api/messages", delete(api::clear_messages))
            // Reference docs.
            .route("/api/skills", get(api::list_skills))
            // Roles.
            .route("/api/roles", get(api::list_roles))
            .route("/api/roles", post(api::create_role))
            .route("/api/roles/{id}", put(api::update_role))
            .route("/api/roles/{id}", delete(api::delete_role))
            // Scheduled jobs.
            .route("/api/jobs", get(api::list_jobs))
            .route("/api/jobs", post(api::create_job))
            .route("/api/jobs/{id}", delete(api::cancel_job))
            // OAuth tokens.
            .route("/api/oauth/tokens", post(api::register_token))
            .layer(cors)
            .with_state(Arc::clone(&self.state))
    }

    /// Start the server and block until it is shut down.
    pub async fn start(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = self.addr();
        let router = self.router();

        tracing::info!(addr = %addr, "starting web server");

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
