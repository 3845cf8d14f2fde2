use axum::middleware;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::auth::{require_bearer_token, HasTokenVerifier};

/// Applies the standard bearer-auth + request-tracing layers to a router of
/// protected routes and binds `state`. Callers merge the result with their
/// own unauthenticated `/health` route:
///
/// ```ignore
/// Router::new()
///     .route("/health", get(http_api::health::health))
///     .merge(with_standard_layers(protected_routes, state))
/// ```
pub fn with_standard_layers<S>(protected: Router<S>, state: S) -> Router
where
    S: HasTokenVerifier + Clone + Send + Sync + 'static,
{
    protected
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer_token::<S>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenVerifier;
    use crate::health::health;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::routing::get;
    use std::sync::Arc;
    use tower::util::ServiceExt;

    #[derive(Clone)]
    struct DummyState {
        verifier: Arc<dyn crate::auth::TokenVerifier>,
    }

    impl HasTokenVerifier for DummyState {
        fn token_verifier(&self) -> &Arc<dyn crate::auth::TokenVerifier> {
            &self.verifier
        }
    }

    fn test_app() -> Router {
        let state = DummyState { verifier: Arc::new(StaticTokenVerifier::single("secret")) };
        let protected = Router::new().route("/protected", get(|| async { "ok" }));
        Router::new()
            .route("/health", get(health))
            .merge(with_standard_layers(protected, state))
    }

    #[tokio::test]
    async fn health_is_unauthenticated() {
        let resp = test_app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn protected_route_without_token_is_401() {
        let resp = test_app()
            .oneshot(Request::builder().uri("/protected").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn protected_route_with_correct_token_is_200() {
        let resp = test_app()
            .oneshot(
                Request::builder()
                    .uri("/protected")
                    .header("Authorization", "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
