use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use admin::events::EventPublisher;
use admin::gc::{run_loop as run_gc_loop, GarbageCollector};
use admin::se_registry::{run_loop as run_se_registry_loop, SeRegistry};
use admin::{build_app, AppState};
use admin_store::{DurableRegistry, InMemoryRegistry, PostgresRegistry};
use anyhow::{Context, Result};
use clap::Parser;
use http_api::StaticTokenVerifier;
use storage_config::load_admin_config;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Admin: owns the file registry, storage-element health view, and garbage collection")]
struct Cli {
    /// Path to admin's YAML config file.
    #[arg(long, env = "ADMIN_CONFIG_PATH")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).with_target(false).init();

    let cli = Cli::parse();
    let cfg = load_admin_config(&cli.config).with_context(|| format!("loading config from {}", cli.config.display()))?;

    let registry: Arc<dyn DurableRegistry> = if cfg.database_url.starts_with("memory://") {
        Arc::new(InMemoryRegistry::new())
    } else {
        Arc::new(PostgresRegistry::connect(&cfg.database_url).await.context("connecting to admin database")?)
    };

    let se_registry = Arc::new(SeRegistry::new(cfg.storage_elements.clone(), cfg.auth_token.clone()));
    let events = Arc::new(if cfg.event_redis_url.starts_with("memory://") {
        EventPublisher::disabled()
    } else {
        EventPublisher::connect(&cfg.event_redis_url).await.context("connecting to event redis")?
    });
    let gc = Arc::new(GarbageCollector::new(
        registry.clone(),
        se_registry.clone(),
        cfg.auth_token.clone(),
        cfg.scheduler.gc_batch_size,
        cfg.scheduler.completed_tx_retention_hours,
    ));

    let state = AppState {
        registry,
        se_registry: se_registry.clone(),
        events,
        gc: gc.clone(),
        http_client: reqwest::Client::new(),
        auth_token: cfg.auth_token.clone(),
        token_verifier: Arc::new(StaticTokenVerifier::new(cfg.admin_token.clone(), cfg.auth_token.clone())),
    };

    tokio::spawn(run_se_registry_loop(se_registry, Duration::from_secs(cfg.scheduler.health_check_interval_secs)));
    tokio::spawn(run_gc_loop(gc, Duration::from_secs(cfg.scheduler.gc_interval_secs)));

    tracing::info!(bind = %cfg.bind_addr, storage_elements = cfg.storage_elements.len(), "starting admin");

    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", cfg.bind_addr))?;
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
