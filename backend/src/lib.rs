//! udpchat backend library
//!
//! The membership registry service plus everything a peer needs to join it:
//! clock synchronization, the local membership cache and UDP fan-out.

pub mod api;
pub mod bridge;
pub mod clocksync;
pub mod config;
pub mod error;
pub mod fanout;
pub mod membership;
pub mod models;
pub mod registry;

use axum::http::{header, Method};
use axum::{routing::get, Router};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::AppState;

/// Create the application router with the given state
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(api::health::health_check))
        // Membership
        .route("/register", get(api::members::register))
        .route("/list", get(api::members::list))
        // Browser bridge
        .route("/ws", get(api::ws::ws_handler))
        // Metrics (Prometheus)
        .route("/metrics", get(api::metrics::metrics_handler))
        .fallback(api::members::not_found)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
}

/// Create CORS layer for browser clients
fn cors_layer() -> CorsLayer {
    // Allow origins from environment or default to localhost for development
    let allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:8080,http://127.0.0.1:8080".to_string());

    let origins: Vec<_> = allowed_origins
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
}
