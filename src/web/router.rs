//! Router configuration for the web surface.

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use super::socket::websocket_handler;
use super::AppState;

/// Create the chat router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/websocket/:room", get(websocket_handler))
        .with_state(state)
        .merge(create_health_router())
        .layer(TraceLayer::new_for_http())
}

/// Create a health check router.
pub fn create_health_router() -> Router {
    Router::new().route("/health", get(health_check))
}

/// Health check handler.
async fn health_check() -> &'static str {
    "OK"
}
