use std::sync::Arc;

use http_api::{HasReadinessCheck, HasTokenVerifier, TokenVerifier};
use storage_coordination::store::CoordinationStore;

use crate::admin_client::AdminClient;
use crate::capacity_monitor::CapacityMonitor;
use crate::finalize::FinalizeService;
use crate::selector::StorageSelector;

#[derive(Clone)]
pub struct AppState {
    pub capacity_monitor: Arc<CapacityMonitor>,
    pub selector: Arc<StorageSelector>,
    pub finalize_service: Arc<FinalizeService>,
    pub admin_client: Arc<AdminClient>,
    pub coordination: Arc<dyn CoordinationStore>,
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
        self.coordination.ping().await.map_err(|e| e.to_string())
    }
}
