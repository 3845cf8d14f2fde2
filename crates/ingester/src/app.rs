use axum::routing::{get, post};
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// The ingester's HTTP surface: unauthenticated health check, everything
/// else behind the shared bearer-token middleware.
pub fn build_app(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/v1/files/upload", post(handlers::upload_file))
        .route("/api/v1/finalize/:file_id", post(handlers::finalize_file))
        .route("/api/v1/finalize/status/:transaction_id", get(handlers::finalize_status));

    let ready = Router::new().route("/health/ready", get(http_api::ready::<AppState>)).with_state(state.clone());

    Router::new()
        .route("/health", get(http_api::health::health))
        .merge(ready)
        .merge(http_api::with_standard_layers(protected, state))
}
