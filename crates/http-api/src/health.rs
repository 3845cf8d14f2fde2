use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

/// Liveness handler shared by all four services: if the process can run this
/// handler at all, it is alive. Readiness (dependency checks) is each
/// service's own responsibility since they depend on different backends.
pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

/// Implemented by each service's `AppState` to back `/health/ready` with a
/// cheap round-trip to whatever backend that service can't serve requests
/// without: Postgres for Admin, Redis for Query's event stream and the
/// Ingester's coordination store, the local/S3 backend for the storage
/// element.
#[async_trait::async_trait]
pub trait HasReadinessCheck {
    async fn check_ready(&self) -> Result<(), String>;
}

/// `GET /health/ready`: 200 if [`HasReadinessCheck::check_ready`] succeeds,
/// 503 otherwise. Unlike `/health`, this is meant for load balancers and
/// orchestrators deciding whether to route traffic, not just process
/// liveness.
pub async fn ready<S>(State(state): State<S>) -> impl IntoResponse
where
    S: HasReadinessCheck + Clone + Send + Sync + 'static,
{
    match state.check_ready().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ready" }))),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "not ready", "error": e }))),
    }
}
