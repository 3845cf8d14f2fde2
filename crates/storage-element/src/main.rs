use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use http_api::StaticTokenVerifier;
use storage_backend::{LocalBackend, S3Backend, StorageBackend};
use storage_config::{load_se_config, BackendConfig};
use storage_element::service::FileService;
use storage_element::{build_app, AppState};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Storage element: durable byte storage for one partition of the object store")]
struct Cli {
    /// Path to the storage element's YAML config file.
    #[arg(long, env = "SE_CONFIG_PATH")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let cfg = load_se_config(&cli.config).with_context(|| format!("loading config from {}", cli.config.display()))?;

    let (backend_label, endpoint, backend): (String, Option<String>, Arc<dyn StorageBackend>) = match cfg.backend {
        BackendConfig::Local { root } => ("local".to_string(), None, Arc::new(LocalBackend::new(root))),
        BackendConfig::S3 { endpoint, bucket, region, access_key, secret_key, app_folder } => (
            "s3".to_string(),
            Some(endpoint.clone()),
            Arc::new(S3Backend::new(endpoint, bucket, region, access_key, secret_key, app_folder)),
        ),
    };
    backend.health_check().await.context("backend health check failed at startup")?;

    let wal = Arc::new(storage_element::wal::FileWal::new(cfg.wal_dir.clone()));
    let cache = storage_element::cache::MetadataCache::new();
    let lock_mgr = Arc::new(storage_element::lock::CacheLockManager::new());

    let file_service = Arc::new(FileService::new(
        storage_domain::SeId::new(cfg.se_id.clone()),
        cfg.mode,
        cfg.priority,
        cfg.capacity_total_bytes,
        backend_label,
        cfg.datacenter_location.clone(),
        endpoint,
        backend,
        wal,
        cache,
        lock_mgr,
    ));

    let state = AppState {
        file_service,
        token_verifier: Arc::new(StaticTokenVerifier::single(cfg.auth_token.clone())),
    };

    tracing::info!(se_id = %cfg.se_id, mode = %cfg.mode, bind = %cfg.bind_addr, "starting storage element");

    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", cfg.bind_addr))?;
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
