use std::sync::Arc;

use admin_store::DurableRegistry;
use http_api::{HasReadinessCheck, HasTokenVerifier, TokenVerifier};

use crate::events::EventPublisher;
use crate::gc::GarbageCollector;
use crate::se_registry::SeRegistry;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<dyn DurableRegistry>,
    pub se_registry: Arc<SeRegistry>,
    pub events: Arc<EventPublisher>,
    pub gc: Arc<GarbageCollector>,
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
        self.registry.ping().await.map_err(|e| e.to_string())
    }
}
