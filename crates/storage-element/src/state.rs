use std::sync::Arc;

use http_api::{HasReadinessCheck, HasTokenVerifier, TokenVerifier};

use crate::service::FileService;

#[derive(Clone)]
pub struct AppState {
    pub file_service: Arc<FileService>,
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
        self.file_service.backend().health_check().await.map_err(|e| e.to_string())
    }
}
