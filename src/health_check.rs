//! # Health-Check Loop
//!
//! A periodic ticker that invokes `ServerPool::health_check` on every
//! tick, in the same tokio-`interval` background-task shape the reference
//! crate's `MetricsCollector::start_reporting` uses for periodic work, and
//! the probe-then-log-on-transition structure a minimal Rust load balancer
//! in the wider ecosystem uses for its own `health_checker` function.

use crate::backend::ServerPool;
use crate::batching::Batcher;
use crate::cache::CacheManager;
use crate::config::Config;
use std::sync::Arc;
use tracing::info;

/// Spawns the health-check loop. Returns its `JoinHandle` so the caller can
/// abort it during graceful shutdown.
pub fn spawn(
    pool: Arc<ServerPool>,
    caches: Arc<CacheManager>,
    health_batcher: Arc<Batcher<String, bool>>,
    config: &Config,
) -> tokio::task::JoinHandle<()> {
    let interval = config.health_check_interval();
    let enabled = config.enable_health_checks;
    let submit_deadline = config.health_submit_deadline();

    tokio::spawn(async move {
        if !enabled {
            info!("health-check loop disabled");
            return;
        }

        info!(interval = ?interval, "health-check loop started");
        let mut ticker = tokio::time::interval(interval);

        loop {
            ticker.tick().await;
            pool.health_check(&caches, &health_batcher, submit_deadline).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batching::{health_process_fn, BatcherConfig};
    use crate::pool::ConnectionPool;
    use std::time::Duration;

    #[tokio::test]
    async fn spawn_respects_disabled_flag() {
        let mut config = Config::for_test();
        config.enable_health_checks = false;
        let pool = Arc::new(ServerPool::new());
        let caches = Arc::new(CacheManager::new(&config));
        let connections = Arc::new(ConnectionPool::new(&config));
        let health_batcher = Arc::new(Batcher::new(
            BatcherConfig::default(),
            health_process_fn(connections, config.pool_request_timeout()),
        ));

        let handle = spawn(pool, caches, health_batcher, &config);
        tokio::time::timeout(Duration::from_millis(200), handle)
            .await
            .expect("task should exit promptly when disabled")
            .unwrap();
    }
}
