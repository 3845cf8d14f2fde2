use axum::routing::{get, patch, post};
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Assembles the storage element's HTTP surface: unauthenticated health
/// check, everything else behind the shared bearer-token middleware.
pub fn build_app(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/v1/files/upload", post(handlers::upload_file))
        .route("/api/v1/files/:id/download", get(handlers::download_file))
        .route(
            "/api/v1/files/:id",
            get(handlers::get_metadata).patch(handlers::update_metadata).delete(handlers::delete_file),
        )
        .route("/api/v1/capacity", get(handlers::get_capacity))
        .route("/api/v1/info", get(handlers::get_info))
        .route("/api/v1/mode", patch(handlers::patch_mode))
        .route("/api/v1/consistency", get(handlers::get_consistency))
        .route("/api/v1/consistency/rebuild-full", post(handlers::post_rebuild_full))
        .route("/api/v1/consistency/rebuild-incremental", post(handlers::post_rebuild_incremental))
        .route("/api/v1/consistency/cleanup-expired", post(handlers::post_cleanup_expired));

    let ready = Router::new().route("/health/ready", get(http_api::ready::<AppState>)).with_state(state.clone());

    Router::new()
        .route("/health", get(http_api::health::health))
        .merge(ready)
        .merge(http_api::with_standard_layers(protected, state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MetadataCache;
    use crate::lock::CacheLockManager;
    use crate::service::FileService;
    use crate::wal::InMemoryWal;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_api::StaticTokenVerifier;
    use std::sync::Arc;
    use storage_backend::LocalBackend;
    use storage_domain::{SeId, SeMode};
    use tower::util::ServiceExt;

    fn test_state(dir: &std::path::Path) -> AppState {
        let file_service = Arc::new(FileService::new(
            SeId::new("se-test"),
            SeMode::Rw,
            100,
            1_000_000,
            "local".into(),
            None,
            None,
            Arc::new(LocalBackend::new(dir)),
            Arc::new(InMemoryWal::new()),
            MetadataCache::new(),
            Arc::new(CacheLockManager::new()),
        ));
        AppState { file_service, token_verifier: Arc::new(StaticTokenVerifier::single("secret")) }
    }

    #[tokio::test]
    async fn health_is_reachable_without_a_token() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_app(test_state(dir.path()));
        let resp = app.oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn health_ready_checks_the_backend() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_app(test_state(dir.path()));
        let resp = app.oneshot(Request::builder().uri("/health/ready").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn capacity_requires_a_bearer_token() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_app(test_state(dir.path()));
        let resp = app
            .oneshot(Request::builder().uri("/api/v1/capacity").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn capacity_with_token_returns_ok() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_app(test_state(dir.path()));
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/capacity")
                    .header("Authorization", "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
