use axum::routing::get;
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Query's HTTP surface: unauthenticated health check, everything else
/// behind the shared bearer-token middleware.
pub fn build_app(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/v1/files", get(handlers::search_files))
        .route("/api/v1/files/:id", get(handlers::get_file))
        .route("/api/v1/files/:id/download", get(handlers::download_file));

    let ready = Router::new().route("/health/ready", get(http_api::ready::<AppState>)).with_state(state.clone());

    Router::new()
        .route("/health", get(http_api::health::health))
        .merge(ready)
        .merge(http_api::with_standard_layers(protected, state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use crate::se_resolver::SeResolver;
    use crate::state::RedisPing;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_api::StaticTokenVerifier;
    use std::sync::Arc;
    use tower::util::ServiceExt;

    struct FakeRedis {
        healthy: bool,
    }

    #[async_trait::async_trait]
    impl RedisPing for FakeRedis {
        async fn ping(&self) -> Result<(), String> {
            if self.healthy { Ok(()) } else { Err("connection refused".into()) }
        }
    }

    fn test_state() -> AppState {
        AppState {
            cache: Arc::new(Cache::new()),
            se_resolver: Arc::new(SeResolver::new(vec![], "secret".into())),
            redis: Arc::new(FakeRedis { healthy: true }),
            http_client: reqwest::Client::new(),
            auth_token: "secret".into(),
            token_verifier: Arc::new(StaticTokenVerifier::single("secret")),
        }
    }

    #[tokio::test]
    async fn health_is_reachable_without_a_token() {
        let app = build_app(test_state());
        let resp = app.oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn health_ready_reflects_redis_reachability() {
        let app = build_app(test_state());
        let resp = app.oneshot(Request::builder().uri("/health/ready").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let mut state = test_state();
        state.redis = Arc::new(FakeRedis { healthy: false });
        let app = build_app(state);
        let resp = app.oneshot(Request::builder().uri("/health/ready").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
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
    async fn search_files_with_empty_cache_returns_empty_list() {
        let app = build_app(test_state());
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/files")
                    .header("Authorization", "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
