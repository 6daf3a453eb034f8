//! # Application State
//!
//! Shared state passed to every HTTP handler: the server pool, the cache
//! manager, the connection pool, and the two batcher specializations. Each
//! piece is `Arc`-wrapped individually (rather than the whole struct sitting
//! behind one lock) so the dispatcher, the admin surface, and the
//! background health-check loop can all hold their own clone without
//! contending on a single state lock.

use crate::backend::ServerPool;
use crate::batching::{health_process_fn, stats_process_fn, Batcher, BatcherConfig};
use crate::cache::{BackendStat, CacheManager};
use crate::config::Config;
use crate::graceful_shutdown::GracefulShutdown;
use crate::pool::ConnectionPool;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Aggregate dispatcher-level counters, in the same
/// counters-plus-computed-rate shape the reference crate's
/// `MetricsCollector`/`LLMMetrics` reports, narrowed to what a generic
/// reverse proxy actually has (no token/response-time fields — this system
/// forwards opaque bytes, it doesn't know what's inside them).
#[derive(Debug, Default)]
pub struct RequestMetrics {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestMetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub error_rate: f64,
}

impl RequestMetrics {
    pub fn record_success(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.successful.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RequestMetricsSnapshot {
        let total = self.total.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        RequestMetricsSnapshot {
            total_requests: total,
            successful_requests: self.successful.load(Ordering::Relaxed),
            failed_requests: failed,
            error_rate: if total == 0 { 0.0 } else { failed as f64 / total as f64 },
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: Arc<ServerPool>,
    pub caches: Arc<CacheManager>,
    pub connections: Arc<ConnectionPool>,
    pub health_batcher: Arc<Batcher<String, bool>>,
    pub stats_batcher: Arc<Batcher<String, Vec<BackendStat>>>,
    pub request_metrics: Arc<RequestMetrics>,
    /// Drives the pool-cleanup and batcher-flush background loops. The
    /// caller (see `main.rs`) feeds the process's own shutdown signal into
    /// this same handle rather than creating an independent one, so one
    /// signal tears down every background loop this state owns.
    pub shutdown: GracefulShutdown,
}

impl AppState {
    /// Builds the full set of shared resources and starts the background
    /// batch-flush tickers and the pool cleanup sweep, all wired to exit
    /// once `self.shutdown` is initiated. The health-check loop itself is
    /// started separately by the caller (see `crate::health_check::spawn`)
    /// since it needs to be cancellable independently during graceful
    /// shutdown.
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);
        let pool = Arc::new(ServerPool::new());
        let caches = Arc::new(CacheManager::new(&config));
        let connections = Arc::new(ConnectionPool::new(&config));
        let shutdown = GracefulShutdown::new();

        let batcher_config = BatcherConfig {
            batch_size: config.batch_size,
            batch_timeout: config.batch_timeout(),
            flush_interval: config.flush_interval(),
        };

        let health_batcher = Arc::new(Batcher::new(
            batcher_config.clone(),
            health_process_fn(connections.clone(), config.pool_request_timeout()),
        ));
        let stats_batcher = Arc::new(Batcher::new(
            batcher_config,
            stats_process_fn(pool.clone()),
        ));

        health_batcher.spawn_periodic_flush(shutdown.clone());
        stats_batcher.spawn_periodic_flush(shutdown.clone());
        connections.spawn_cleanup(config.pool_cleanup_interval(), shutdown.clone());

        Self {
            config,
            pool,
            caches,
            connections,
            health_batcher,
            stats_batcher,
            request_metrics: Arc::new(RequestMetrics::default()),
            shutdown,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_state_starts_with_empty_pool() {
        let state = AppState::new(Config::for_test());
        assert_eq!(state.pool.len().await, 0);
    }

    #[tokio::test]
    async fn config_accessor_reflects_constructor_argument() {
        let mut config = Config::for_test();
        config.port = 9999;
        let state = AppState::new(config);
        assert_eq!(state.config().port, 9999);
    }

    #[tokio::test]
    async fn request_metrics_start_at_zero() {
        let state = AppState::new(Config::for_test());
        let snapshot = state.request_metrics.snapshot();
        assert_eq!(snapshot.total_requests, 0);
        assert_eq!(snapshot.error_rate, 0.0);
    }

    #[tokio::test]
    async fn request_metrics_compute_error_rate() {
        let metrics = RequestMetrics::default();
        metrics.record_success();
        metrics.record_success();
        metrics.record_failure();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 3);
        assert_eq!(snapshot.successful_requests, 2);
        assert_eq!(snapshot.failed_requests, 1);
        assert!((snapshot.error_rate - (1.0 / 3.0)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn shutdown_tears_down_background_loops_without_leaking() {
        let state = AppState::new(Config::for_test());
        state.shutdown.initiate_shutdown();

        // Give the pool-cleanup and batcher-flush loops, which poll the
        // shutdown flag every 100ms, a chance to observe it and exit.
        tokio::time::sleep(std::time::Duration::from_millis(250)).await;
        assert!(state.shutdown.is_shutdown_initiated());
    }
}
