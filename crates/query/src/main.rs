use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use http_api::StaticTokenVerifier;
use query::cache::Cache;
use query::consumer::EventConsumer;
use query::se_resolver::{run_loop as run_se_resolver_loop, SeResolver};
use query::{build_app, AppState};
use storage_config::load_query_config;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Query: read-only view over Admin's file registry, kept in sync via a Redis event stream")]
struct Cli {
    /// Path to query's YAML config file.
    #[arg(long, env = "QUERY_CONFIG_PATH")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).with_target(false).init();

    let cli = Cli::parse();
    let cfg = load_query_config(&cli.config).with_context(|| format!("loading config from {}", cli.config.display()))?;

    let cache = Arc::new(Cache::new());
    let cache_dir = PathBuf::from(&cfg.cache_dir);
    cache.load_snapshot(&cache_dir).await;

    let se_resolver = Arc::new(SeResolver::new(cfg.storage_elements.clone(), cfg.auth_token.clone()));
    se_resolver.sync_once().await;

    let consumer_name = format!("query-{}", uuid::Uuid::new_v4());
    let consumer = EventConsumer::connect(
        &cfg.redis_url,
        cfg.stream_name.clone(),
        cfg.consumer_group.clone(),
        consumer_name,
        cfg.batch_size,
        cfg.block_ms,
        cfg.pending_idle_ms,
        cache.clone(),
    )
    .await
    .context("connecting event consumer to redis")?;

    let retry_consumer = consumer.clone();

    let state = AppState {
        cache: cache.clone(),
        se_resolver: se_resolver.clone(),
        redis: Arc::new(consumer.conn_handle()),
        http_client: reqwest::Client::new(),
        auth_token: cfg.auth_token.clone(),
        token_verifier: Arc::new(StaticTokenVerifier::single(cfg.auth_token.clone())),
    };

    tokio::spawn(consumer.consume_loop());
    tokio::spawn(retry_consumer.pending_retry_loop(Duration::from_millis(cfg.pending_retry_ms)));
    tokio::spawn(run_se_resolver_loop(se_resolver, Duration::from_secs(60)));
    tokio::spawn({
        let cache = cache.clone();
        async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(300));
            loop {
                ticker.tick().await;
                cache.save_snapshot(&cache_dir).await;
            }
        }
    });

    tracing::info!(bind = %cfg.bind_addr, "starting query");

    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", cfg.bind_addr))?;
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
