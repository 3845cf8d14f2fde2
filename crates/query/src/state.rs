use std::sync::Arc;

use http_api::{HasReadinessCheck, HasTokenVerifier, TokenVerifier};

use crate::cache::Cache;
use crate::se_resolver::SeResolver;

/// Cheap reachability check for whatever backs the event stream. A trait so
/// `/health/ready` tests don't need a live Redis to exercise the route.
#[async_trait::async_trait]
pub trait RedisPing: Send + Sync {
    async fn ping(&self) -> Result<(), String>;
}

#[async_trait::async_trait]
impl RedisPing for redis::aio::ConnectionManager {
    async fn ping(&self) -> Result<(), String> {
        let mut conn = self.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await.map_err(|e| e.to_string())?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<Cache>,
    pub se_resolver: Arc<SeResolver>,
    pub redis: Arc<dyn RedisPing>,
    pub http_client: reqwest::Client,
    pub auth_token: String,
    pub token_verifier: Arc<dyn TokenVerifier>,
}

impl HasTokenVerifier for AppState {
    fn token_verifier(&self) -> &Arc<dyn TokenVerifier> {
        &self.token_verifier
    }
}

#[async_trait::async_trait]
impl HasReadinessCheck for AppState {
    async fn check_ready(&self) -> Result<(), String> {
        self.redis.ping().await
    }
}
