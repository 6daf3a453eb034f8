//! # Backend & Server Pool
//!
//! A `Backend` is a typed record for one upstream: its URL identity, a
//! liveness flag serialised by its own lock, and monotonic request counters.
//! `ServerPool` holds the ordered set of backends and performs round-robin
//! selection over the cached active set, falling back to a full scan when
//! the routing cache is cold, disabled, or stale.

use crate::batching::Batcher;
use crate::cache::CacheManager;
use crate::pool::ConnectionPool;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// One upstream the load balancer forwards requests to.
///
/// `alive` is guarded by its own lock because the health-check loop flips it
/// from a background task while the dispatcher reads it from request-serving
/// tasks; `success_count`/`fail_count` are plain atomics since they only ever
/// grow and never need to be read alongside `alive` under one lock.
#[derive(Debug)]
pub struct Backend {
    pub url: String,
    alive: RwLock<bool>,
    success_count: AtomicU64,
    fail_count: AtomicU64,
}

impl Backend {
    pub fn new(url: String) -> Self {
        Self {
            url,
            alive: RwLock::new(true),
            success_count: AtomicU64::new(0),
            fail_count: AtomicU64::new(0),
        }
    }

    pub async fn is_alive(&self) -> bool {
        *self.alive.read().await
    }

    /// Flip the liveness flag, logging the transition at the level operators
    /// care about: a backend going down is a warning, coming back is info.
    pub async fn set_alive(&self, alive: bool) {
        let mut guard = self.alive.write().await;
        if *guard != alive {
            if alive {
                info!(url = %self.url, "backend is now alive");
            } else {
                warn!(url = %self.url, "backend is now down");
            }
        }
        *guard = alive;
    }

    pub fn success_count(&self) -> u64 {
        self.success_count.load(Ordering::SeqCst)
    }

    pub fn fail_count(&self) -> u64 {
        self.fail_count.load(Ordering::SeqCst)
    }

    pub fn record_success(&self) {
        self.success_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Reserved for future propagation of proxy-reported errors; the core
    /// dispatcher never calls this. See `ServerPool::dispatch`.
    #[allow(dead_code)]
    pub fn record_failure(&self) {
        self.fail_count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Ordered collection of backends plus a monotonic counter used to derive
/// the round-robin index. Lock ordering when a caller also touches a cache:
/// ServerPool before Cache, never the reverse.
pub struct ServerPool {
    backends: RwLock<Vec<Arc<Backend>>>,
    counter: AtomicU64,
}

impl ServerPool {
    pub fn new() -> Self {
        Self {
            backends: RwLock::new(Vec::new()),
            counter: AtomicU64::new(0),
        }
    }

    /// Appends under the write lock and invalidates the routing and stats
    /// caches in the same critical section so a concurrent reader never
    /// observes a pool update without its cache invalidation.
    pub async fn add_backend(&self, url: String, caches: &CacheManager) -> Arc<Backend> {
        let backend = Arc::new(Backend::new(url));
        {
            let mut backends = self.backends.write().await;
            backends.push(backend.clone());
        }
        caches.routing.invalidate().await;
        caches.stats.mark_dirty();
        info!(url = %backend.url, "backend added");
        backend
    }

    pub async fn backends(&self) -> Vec<Arc<Backend>> {
        self.backends.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.backends.read().await.len()
    }

    /// Fast path: a fresh routing cache entry is consulted first and, if
    /// present, selected from directly. Slow path: scan the live pool for
    /// alive backends, populate the routing cache with that snapshot, and
    /// select from it. Selection is always `counter mod len(active)`, so it
    /// tolerates brief staleness bounded by the routing cache TTL.
    pub async fn get_next_peer_with_cache(&self, caches: &CacheManager) -> Option<Arc<Backend>> {
        if let Some(active) = caches.routing.get().await {
            if !active.is_empty() {
                let idx = (self.counter.fetch_add(1, Ordering::SeqCst) as usize) % active.len();
                return Some(active[idx].clone());
            }
        }

        let backends = self.backends.read().await;
        let mut active = Vec::with_capacity(backends.len());
        for backend in backends.iter() {
            if backend.is_alive().await {
                active.push(backend.clone());
            }
        }
        drop(backends);

        if active.is_empty() {
            return None;
        }

        caches.routing.set(&active).await;
        let idx = (self.counter.fetch_add(1, Ordering::SeqCst) as usize) % active.len();
        Some(active[idx].clone())
    }

    /// Invoked on every health-check tick. Snapshots the backend slice under
    /// a read lock, releases it, then resolves liveness for each: a
    /// cache-first lookup, falling back for cache misses to the health
    /// batcher's coalescing probe path (itself backed by the connection
    /// pool), so multiple backends missing the cache in the same tick are
    /// probed concurrently rather than one at a time. `submit_deadline`
    /// bounds each backend's wait on the batcher so one wedged `processFn`
    /// invocation can't stall the whole tick indefinitely; a backend whose
    /// submit is cancelled this way is treated as down for this tick and
    /// re-probed on the next one. Invalidates the routing cache once the
    /// scan is complete so the next selection re-derives the active set.
    pub async fn health_check(
        &self,
        caches: &CacheManager,
        health_batcher: &Arc<Batcher<String, bool>>,
        submit_deadline: Duration,
    ) {
        let snapshot = self.backends().await;
        let mut misses = Vec::new();

        for backend in &snapshot {
            match caches.health.get(&backend.url).await {
                Some(alive) => backend.set_alive(alive).await,
                None => misses.push(backend.clone()),
            }
        }

        if !misses.is_empty() {
            let mut set = tokio::task::JoinSet::new();
            for backend in misses {
                let batcher = health_batcher.clone();
                set.spawn(async move {
                    let started = std::time::Instant::now();
                    let result = batcher
                        .submit_with_deadline(backend.url.clone(), submit_deadline)
                        .await;
                    (backend, result, started.elapsed().as_millis() as u64)
                });
            }

            while let Some(joined) = set.join_next().await {
                if let Ok((backend, result, latency_ms)) = joined {
                    let alive = matches!(result, Ok(Some(true)));
                    caches.health.set(&backend.url, alive, latency_ms).await;
                    backend.set_alive(alive).await;
                }
            }
        }

        caches.routing.invalidate().await;
        caches.stats.mark_dirty();
    }
}

impl Default for ServerPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Probes `<url>/health` through the pooled client. A response status of
/// 200 means alive; any transport error, non-200 status, or absent response
/// means down.
pub(crate) async fn probe(pool: &ConnectionPool, url: &str, timeout: Duration) -> bool {
    let client = match pool.get(url, timeout).await {
        Ok(client) => client,
        Err(_) => return false,
    };

    let health_url = format!("{}/health", url.trim_end_matches('/'));
    match client.get(&health_url).timeout(timeout).send().await {
        Ok(response) => response.status() == reqwest::StatusCode::OK,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheManager;
    use crate::config::Config;
    use crate::pool::ConnectionPool;

    fn caches() -> CacheManager {
        let config = Config::for_test();
        CacheManager::new(&config)
    }

    #[tokio::test]
    async fn empty_pool_returns_no_peer() {
        let pool = ServerPool::new();
        let caches = caches();
        assert!(pool.get_next_peer_with_cache(&caches).await.is_none());
    }

    #[tokio::test]
    async fn add_backend_is_selectable() {
        let pool = ServerPool::new();
        let caches = caches();
        let backend = pool.add_backend("http://127.0.0.1:9999".to_string(), &caches).await;

        let selected = pool.get_next_peer_with_cache(&caches).await.unwrap();
        assert_eq!(selected.url, backend.url);
    }

    #[tokio::test]
    async fn round_robins_across_alive_backends() {
        let pool = ServerPool::new();
        let caches = caches();
        pool.add_backend("http://127.0.0.1:9001".to_string(), &caches).await;
        pool.add_backend("http://127.0.0.1:9002".to_string(), &caches).await;

        let mut seen = std::collections::HashSet::new();
        for _ in 0..10 {
            let peer = pool.get_next_peer_with_cache(&caches).await.unwrap();
            seen.insert(peer.url.clone());
        }
        assert_eq!(seen.len(), 2);
    }

    #[tokio::test]
    async fn dead_backend_is_skipped() {
        let pool = ServerPool::new();
        let caches = caches();
        let dead = pool.add_backend("http://127.0.0.1:9003".to_string(), &caches).await;
        let alive = pool.add_backend("http://127.0.0.1:9004".to_string(), &caches).await;
        dead.set_alive(false).await;

        caches.routing.invalidate().await;
        for _ in 0..5 {
            let peer = pool.get_next_peer_with_cache(&caches).await.unwrap();
            assert_eq!(peer.url, alive.url);
        }
    }

    #[tokio::test]
    async fn health_check_marks_unreachable_backend_down() {
        let pool = ServerPool::new();
        let caches = caches();
        let connections = Arc::new(ConnectionPool::new(&Config::for_test()));
        let health_batcher = Arc::new(Batcher::new(
            crate::batching::BatcherConfig::default(),
            crate::batching::health_process_fn(connections, Duration::from_millis(200)),
        ));
        let backend = pool.add_backend("http://127.0.0.1:1".to_string(), &caches).await;

        pool.health_check(&caches, &health_batcher, Duration::from_secs(1)).await;
        assert!(!backend.is_alive().await);
    }
}
