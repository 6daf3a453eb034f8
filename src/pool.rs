//! # Connection Pool
//!
//! Maps backend URL to a pooled `reqwest::Client` so probes and forwards
//! reuse keep-alive connections instead of paying a new-client cost per
//! request. `Get` takes a fast read-only path when an unexpired entry is
//! already present; on miss or expiry it falls through to `create_entry`,
//! which resolves the whole check-then-create-then-insert sequence through
//! DashMap's own `entry().and_modify().or_insert_with()`, the same atomic
//! per-key idiom `HealthCache::set` uses — two concurrent first-time `get`s
//! for the same URL still only ever produce one winning `Client` for that
//! key, never two independent instances racing each other into the map.

use crate::config::Config;
use crate::core::http_client::HttpClientBuilder;
use crate::error::ProxyError;
use crate::graceful_shutdown::GracefulShutdown;
use dashmap::DashMap;
use reqwest::Client;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

struct PoolEntry {
    client: Client,
    created_at: Instant,
    last_used: Mutex<Instant>,
    use_count: AtomicU64,
}

impl PoolEntry {
    fn is_expired(&self, max_lifetime: Duration, idle_timeout: Duration, last_used: Instant) -> bool {
        self.created_at.elapsed() > max_lifetime || last_used.elapsed() > idle_timeout
    }
}

/// Field names on the wire (`hit_count`/`miss_count`/`eviction_count`/
/// `create_count`) match the documented `/cache-metrics` surface rather than
/// the shorter internal field names.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PoolMetrics {
    #[serde(rename = "hit_count")]
    pub hits: u64,
    #[serde(rename = "miss_count")]
    pub misses: u64,
    #[serde(rename = "create_count")]
    pub creates: u64,
    #[serde(rename = "eviction_count")]
    pub evictions: u64,
    pub size: usize,
    pub hit_rate: f64,
}

/// Per-backend-URL pool of reusable HTTP clients with TTL and idle
/// eviction, cleaned up on a background tick.
pub struct ConnectionPool {
    entries: Arc<DashMap<String, Arc<PoolEntry>>>,
    max_idle_per_host: usize,
    max_lifetime: Duration,
    idle_timeout: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    creates: AtomicU64,
    evictions: AtomicU64,
}

impl ConnectionPool {
    pub fn new(config: &Config) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            max_idle_per_host: config.pool_max_idle_conns,
            max_lifetime: config.pool_max_lifetime(),
            idle_timeout: config.pool_idle_timeout(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            creates: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Returns a pooled client for `url`, creating one if absent or
    /// expired. `timeout` bounds the client's per-request timeout, so a
    /// freshly created client always reflects the caller's current
    /// deadline even though the underlying connection is reused.
    pub async fn get(&self, url: &str, timeout: Duration) -> Result<Client, ProxyError> {
        if let Some(entry) = self.entries.get(url) {
            let last_used = *entry.last_used.lock().unwrap();
            if !entry.is_expired(self.max_lifetime, self.idle_timeout, last_used) {
                *entry.last_used.lock().unwrap() = Instant::now();
                entry.use_count.fetch_add(1, Ordering::Relaxed);
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(entry.client.clone());
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        self.create_entry(url, timeout).await
    }

    /// Builds a client speculatively, then resolves the insert through a
    /// single `entry()` call on the map's own per-key lock: if another task
    /// already created a fresh entry for `url` while this one was building
    /// its client, that winning entry is reused and the speculative client
    /// built here is simply dropped, unused.
    async fn create_entry(&self, url: &str, timeout: Duration) -> Result<Client, ProxyError> {
        let client = HttpClientBuilder::new()
            .timeout(timeout)
            .pool_config(crate::core::http_client::PoolConfig {
                max_idle_per_host: self.max_idle_per_host,
                idle_timeout: self.idle_timeout,
                keepalive: Some(Duration::from_secs(60)),
            })
            .build()
            .map_err(|err| ProxyError::Internal(format!("failed to build pooled client: {}", err)))?;

        let max_lifetime = self.max_lifetime;
        let idle_timeout = self.idle_timeout;
        let mut created = false;

        let result_client = {
            let stored = self
                .entries
                .entry(url.to_string())
                .and_modify(|existing| {
                    let last_used = *existing.last_used.lock().unwrap();
                    if existing.is_expired(max_lifetime, idle_timeout, last_used) {
                        *existing = Arc::new(PoolEntry {
                            client: client.clone(),
                            created_at: Instant::now(),
                            last_used: Mutex::new(Instant::now()),
                            use_count: AtomicU64::new(1),
                        });
                        created = true;
                    } else {
                        existing.use_count.fetch_add(1, Ordering::Relaxed);
                    }
                })
                .or_insert_with(|| {
                    created = true;
                    Arc::new(PoolEntry {
                        client: client.clone(),
                        created_at: Instant::now(),
                        last_used: Mutex::new(Instant::now()),
                        use_count: AtomicU64::new(1),
                    })
                });
            stored.client.clone()
        };

        if created {
            self.creates.fetch_add(1, Ordering::Relaxed);
            debug!(url, "created pooled client");
        }

        Ok(result_client)
    }

    /// Evicts expired entries. Intended to run on a fixed interval from a
    /// background task; see `Self::spawn_cleanup`.
    pub async fn cleanup(&self) {
        let mut expired = Vec::new();
        for item in self.entries.iter() {
            let last_used = *item.value().last_used.lock().unwrap();
            if item.value().is_expired(self.max_lifetime, self.idle_timeout, last_used) {
                expired.push(item.key().clone());
            }
        }

        for url in expired {
            if self.entries.remove(&url).is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(url = %url, "evicted expired pooled client");
            }
        }
    }

    /// Spawns the background cleanup loop. Each tick races the ticker
    /// against `shutdown`, so the loop exits on its own once shutdown is
    /// initiated instead of needing to be aborted from outside.
    pub fn spawn_cleanup(self: &Arc<Self>, interval: Duration, shutdown: GracefulShutdown) -> tokio::task::JoinHandle<()> {
        let pool = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        pool.cleanup().await;
                    }
                    _ = shutdown.wait_for_shutdown() => {
                        debug!("pool cleanup loop exiting on shutdown");
                        break;
                    }
                }
            }
        })
    }

    pub fn close(&self) {
        self.entries.clear();
    }

    pub fn metrics(&self) -> PoolMetrics {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        PoolMetrics {
            hits,
            misses,
            creates: self.creates.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size: self.entries.len(),
            hit_rate: if total == 0 { 0.0 } else { hits as f64 / total as f64 * 100.0 },
        }
    }
}
