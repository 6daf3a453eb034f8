//! # Server Module
//!
//! Consolidates the admin surface and the catch-all dispatcher behind one
//! router, the same compression/trace/CORS middleware stack the reference
//! crate wires up for its own routes.

pub mod handlers;
pub mod state;

pub use state::AppState;

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    trace::{self, TraceLayer},
};
use tracing::Level;

/// Create the router with the admin surface plus the catch-all dispatcher
/// and middleware stack.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/add-backend", post(handlers::add_backend))
        .route("/stats", get(handlers::stats))
        .route("/health", get(handlers::health_check))
        .route("/cache-metrics", get(handlers::cache_metrics))
        .fallback(handlers::dispatch)
        .layer(
            ServiceBuilder::new()
                .layer(CompressionLayer::new())
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                        .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
