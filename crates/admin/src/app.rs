use axum::routing::{get, post};
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Admin's HTTP surface: unauthenticated health check, everything else
/// behind the shared bearer-token middleware. `delete_file`, `run_gc`, and
/// `detect_orphans` additionally check for [`http_api::auth::Role::Admin`]
/// themselves since they destroy data or trigger cluster-wide cleanup.
pub fn build_app(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/v1/files", post(handlers::register_file).get(handlers::list_files))
        .route(
            "/api/v1/files/:id",
            get(handlers::get_file).put(handlers::update_file).delete(handlers::delete_file),
        )
        .route("/api/v1/internal/storage-elements/available", get(handlers::available_storage_elements))
        .route("/api/v1/storage-elements/:se_id/mode", axum::routing::patch(handlers::patch_storage_element_mode))
        .route("/api/v1/gc/run", post(handlers::run_gc))
        .route("/api/v1/gc/orphans/:se_id", post(handlers::detect_orphans));

    let ready = Router::new().route("/health/ready", get(http_api::ready::<AppState>)).with_state(state.clone());

    Router::new()
        .route("/health", get(http_api::health::health))
        .merge(ready)
        .merge(http_api::with_standard_layers(protected, state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventPublisher;
    use crate::gc::GarbageCollector;
    use crate::se_registry::SeRegistry;
    use admin_store::InMemoryRegistry;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_api::StaticTokenVerifier;
    use std::sync::Arc;
    use tower::util::ServiceExt;

    fn test_state() -> AppState {
        let registry: Arc<dyn admin_store::DurableRegistry> = Arc::new(InMemoryRegistry::new());
        let se_registry = Arc::new(SeRegistry::new(vec![], "secret".into()));
        let gc = Arc::new(GarbageCollector::new(registry.clone(), se_registry.clone(), "secret".into(), 100, 24));
        AppState {
            registry,
            se_registry,
            events: Arc::new(EventPublisher::disabled()),
            gc,
            http_client: reqwest::Client::new(),
            auth_token: "secret".into(),
            token_verifier: Arc::new(StaticTokenVerifier::new("admin-secret", "secret")),
        }
    }

    #[tokio::test]
    async fn health_ready_checks_the_registry() {
        let app = build_app(test_state());
        let resp = app.oneshot(Request::builder().uri("/health/ready").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn health_is_reachable_without_a_token() {
        let app = build_app(test_state());
        let resp = app.oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn get_file_requires_a_bearer_token() {
        let app = build_app(test_state());
        let resp = app
            .oneshot(Request::builder().uri(format!("/api/v1/files/{}", uuid::Uuid::new_v4())).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn get_file_with_token_but_unknown_id_is_404() {
        let app = build_app(test_state());
        let resp = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/v1/files/{}", uuid::Uuid::new_v4()))
                    .header("Authorization", "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn available_storage_elements_with_none_configured_is_503() {
        let app = build_app(test_state());
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/internal/storage-elements/available?mode=RW")
                    .header("Authorization", "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn delete_file_with_user_token_is_403() {
        let app = build_app(test_state());
        let resp = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/v1/files/{}", uuid::Uuid::new_v4()))
                    .header("Authorization", "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn delete_file_with_admin_token_and_unknown_id_is_404() {
        let app = build_app(test_state());
        let resp = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/v1/files/{}", uuid::Uuid::new_v4()))
                    .header("Authorization", "Bearer admin-secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn run_gc_with_user_token_is_403() {
        let app = build_app(test_state());
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/gc/run")
                    .header("Authorization", "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
