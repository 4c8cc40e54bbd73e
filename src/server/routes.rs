//! Router configuration for the worker API.

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use super::{auth, handlers, AppState};

/// Create the API router with auth and CORS layers applied.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/fetch-html", post(handlers::fetch_html))
        .route("/api/generate-blueprint", post(handlers::generate_blueprint))
        .route("/api/test-blueprint", post(handlers::test_blueprint))
        .route("/api/run-watch", post(handlers::run_watch))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
