//! Tandem server binary.
//!
//! Wires the stores, provider registry, adapter factory, orchestrator,
//! job runner, and web server together, then runs until interrupted.

mod config;
mod providers;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tandem_agent::{
    AdapterFactory, FactoryConfig, HttpChatModel, ModelConfig, Orchestrator, OrchestratorConfig,
    PostProcessor, ToolCatalog, UriResolver,
};
use tandem_auth::{HttpRefresher, InstalledAppCredentials, TokenService};
use tandem_jobs::{JobRunner, RunnerConfig, TurnExecutor};
use tandem_store::{
    Database, FileCache, JobStore, MessageStore, ProviderConfigStore, RoleStore, SettingsStore,
    SkillStore, TokenStore, UserStore,
};
use tandem_web::{AppState, WebConfig, WebServer};

use crate::config::TandemConfig;
use crate::providers::{HttpDriveFetcher, build_registry};

#[derive(Debug, Parser)]
#[command(name = "tandem", about = "Tandem agent execution runtime")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "tandem.toml")]
    config: PathBuf,

    /// Override the data directory.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Override the listen port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let mut config = TandemConfig::load(Some(&args.config))?;
    if let Some(data_dir) = args.data_dir {
        config.data_dir = Some(data_dir);
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;

    // ── stores ───────────────────────────────────────────────────────
    let db = Database::open_metadata(data_dir.join("tandem.db")).await?;
    let cache = FileCache::new(data_dir.join("temp"))?;
    let memory_root = data_dir.join("memory");
    std::fs::create_dir_all(&memory_root)?;

    let users = UserStore::new(db.clone());
    let default_user = config.default_user.clone().unwrap_or_else(|| "local".into());
    users.ensure(&default_user, &default_user).await?;

    let token_store = TokenStore::new(db.clone());
    let jobs = JobStore::new(db.clone());
    let roles = RoleStore::new(db.clone());
    let settings = SettingsStore::new(db.clone());
    let messages = MessageStore::new(db.clone());
    let provider_configs = ProviderConfigStore::new(db.clone());

    // ── credentials ──────────────────────────────────────────────────
    let google = config.google.as_ref().map(|g| InstalledAppCredentials {
        client_id: g.client_id.clone(),
        client_secret: g.client_secret.clone().unwrap_or_default(),
    });
    let refresher = match config.google.as_ref() {
        Some(g) => HttpRefresher::google(
            g.client_id.clone(),
            g.client_secret.clone().unwrap_or_default(),
        ),
        None => HttpRefresher::google(String::new(), String::new()),
    };
    let tokens = Arc::new(TokenService::new(token_store.clone(), Box::new(refresher)));

    // ── adapters and agent ───────────────────────────────────────────
    let registry = build_registry(jobs.clone());
    let factory = Arc::new(AdapterFactory::new(
        registry,
        Arc::clone(&tokens),
        provider_configs.clone(),
        FactoryConfig {
            work_root: data_dir.join("work"),
            memory_root,
            google,
        },
    ));

    let api_key = config
        .model
        .api_key
        .clone()
        .context("model api key missing: set ANTHROPIC_API_KEY")?;
    let model = Arc::new(HttpChatModel::new(ModelConfig::anthropic(
        api_key,
        config.model.model.clone(),
    ))?);

    let resolver = Arc::new(UriResolver::new(
        cache.clone(),
        Some(Arc::new(HttpDriveFetcher::new(Arc::clone(&tokens)))),
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        model,
        Arc::clone(&factory),
        ToolCatalog::new(),
        resolver,
        Arc::new(PostProcessor::new(cache)),
        settings,
        roles.clone(),
        messages.clone(),
        tokens,
        OrchestratorConfig::default(),
    ));

    // ── job runner ───────────────────────────────────────────────────
    let mut runner = JobRunner::new(
        jobs.clone(),
        Arc::clone(&orchestrator) as Arc<dyn TurnExecutor>,
        RunnerConfig::default(),
    );
    runner.start()?;

    // ── web server ───────────────────────────────────────────────────
    let state = Arc::new(AppState {
        orchestrator,
        factory: Arc::clone(&factory),
        roles,
        jobs,
        tokens: token_store,
        messages: messages.clone(),
        provider_configs: provider_configs.clone(),
        skills: SkillStore::new(db.clone()),
        default_user: default_user.clone(),
    });
    let server = WebServer::new(
        WebConfig {
            bind_addr: config.server.bind_addr.clone(),
            port: config.server.port,
        },
        state,
    );

    info!(addr = %server.addr(), user = %default_user, "tandem starting");

    tokio::select! {
        result = server.start() => {
            result.map_err(|e| anyhow::anyhow!("server error: {e}"))?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received; shutting down");
        }
    }

    runner.stop().await;
    factory.close_user(&default_user).await;
    Ok(())
}
