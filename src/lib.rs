//! # reverse_proxy_lb — a reverse-proxy load balancer
//!
//! Distributes HTTP traffic across a pool of backends, continuously probes
//! their liveness, and layers three coordinated performance pieces on top:
//! a multi-tier TTL cache (health, stats, active-routing set), a per-backend
//! HTTP connection pool for keep-alive reuse, and a request batcher with
//! key-level coalescing for health/stats fan-in.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use reverse_proxy_lb::{Config, AppState, create_router};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::for_test(); // or Config::parse_args() for CLI
//!     let state = AppState::new(config);
//!     let app = create_router(state);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8082").await?;
//!     axum::serve(listener, app).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`config`] — layered configuration with CLI, env, and validation
//! - [`error`] — the typed `ProxyError` surfaced at every fallible seam
//! - [`backend`] — the `Backend` record and the `ServerPool` it lives in
//! - [`cache`] — the health, stats, and routing TTL caches
//! - [`pool`] — the per-backend-URL pooled HTTP client
//! - [`batching`] — the generic key-coalescing batcher and its specializations
//! - [`health_check`] — the periodic liveness-probing loop
//! - [`server`] — the axum router, application state, and HTTP handlers
//! - [`graceful_shutdown`] — signal-driven shutdown

pub mod core;
pub mod config;
pub mod error;
pub mod graceful_shutdown;

#[cfg(feature = "server")]
pub mod backend;

#[cfg(feature = "server")]
pub mod cache;

#[cfg(feature = "server")]
pub mod pool;

#[cfg(feature = "server")]
pub mod batching;

#[cfg(feature = "server")]
pub mod health_check;

#[cfg(feature = "server")]
pub mod server;

pub use config::Config;
pub use error::ProxyError;
pub use core::http_client::{HttpClientBuilder, HttpClientConfig};
pub use graceful_shutdown::{
    setup_shutdown_handler, spawn_signal_listener, GracefulShutdown, ServerLifecycle, ShutdownConfig,
};

#[cfg(feature = "server")]
pub use backend::{Backend, ServerPool};

#[cfg(feature = "server")]
pub use cache::{AllCacheMetrics, CacheManager, CacheMetrics};

#[cfg(feature = "server")]
pub use pool::{ConnectionPool, PoolMetrics};

#[cfg(feature = "server")]
pub use batching::{Batcher, BatcherConfig, BatcherStats};

#[cfg(feature = "server")]
pub use server::{create_router, AppState};

/// The result type used throughout the library.
pub type Result<T> = std::result::Result<T, ProxyError>;
