pub mod cli;
pub mod config;
pub mod rooms;
pub mod websocket;

use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::rooms::RoomRegistry;
use crate::websocket::websocket_handler;

async fn health_check() -> &'static str {
    "ok"
}

/// Build the lobby application: a health probe and the relay endpoint.
pub fn build_router(registry: RoomRegistry) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(websocket_handler))
        .with_state(registry)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
