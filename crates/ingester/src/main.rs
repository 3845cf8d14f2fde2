use std::path::PathBuf;
use std::sync::Arc;

use admin_store::{DurableRegistry, InMemoryRegistry, PostgresRegistry};
use anyhow::{Context, Result};
use clap::Parser;
use http_api::StaticTokenVerifier;
use ingester::admin_client::AdminClient;
use ingester::capacity_monitor::{run_loop, CapacityMonitor};
use ingester::finalize::FinalizeService;
use ingester::selector::StorageSelector;
use ingester::{build_app, AppState};
use storage_config::load_ingester_config;
use storage_coordination::leader::LeaderElector;
use storage_coordination::memory::InMemoryCoordinationStore;
use storage_coordination::redis_store::RedisCoordinationStore;
use storage_coordination::store::CoordinationStore;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Ingester: selects a storage element for new uploads and drives two-phase finalization")]
struct Cli {
    /// Path to the ingester's YAML config file.
    #[arg(long, env = "INGESTER_CONFIG_PATH")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).with_target(false).init();

    let cli = Cli::parse();
    let cfg =
        load_ingester_config(&cli.config).with_context(|| format!("loading config from {}", cli.config.display()))?;

    let store: Arc<dyn CoordinationStore> = if cfg.coordination_redis_url.starts_with("memory://") {
        Arc::new(InMemoryCoordinationStore::new())
    } else {
        Arc::new(
            RedisCoordinationStore::connect(&cfg.coordination_redis_url)
                .await
                .context("connecting to coordination redis")?,
        )
    };

    let leader = Arc::new(LeaderElector::new(store.clone()));
    let capacity_monitor = Arc::new(CapacityMonitor::new(
        store.clone(),
        leader,
        cfg.storage_elements.clone(),
        cfg.auth_token.clone(),
        cfg.capacity_monitor.clone(),
    ));
    let coordination = store.clone();
    let selector = Arc::new(StorageSelector::new(store, cfg.admin_base_url.clone(), cfg.auth_token.clone()));

    let registry: Arc<dyn DurableRegistry> = if cfg.database_url.starts_with("memory://") {
        Arc::new(InMemoryRegistry::new())
    } else {
        Arc::new(PostgresRegistry::connect(&cfg.database_url).await.context("connecting to postgres")?)
    };
    let finalize_service = Arc::new(FinalizeService::new(cfg.auth_token.clone(), registry));
    let admin_client = Arc::new(AdminClient::new(cfg.admin_base_url.clone(), cfg.auth_token.clone()));

    let state = AppState {
        capacity_monitor: capacity_monitor.clone(),
        selector,
        finalize_service,
        admin_client,
        coordination,
        http_client: reqwest::Client::new(),
        auth_token: cfg.auth_token.clone(),
        token_verifier: Arc::new(StaticTokenVerifier::single(cfg.auth_token.clone())),
    };

    tokio::spawn(run_loop(capacity_monitor));

    tracing::info!(bind = %cfg.bind_addr, storage_elements = cfg.storage_elements.len(), "starting ingester");

    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", cfg.bind_addr))?;
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
