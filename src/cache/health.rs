//! # Health Cache
//!
//! Per-URL alive/latency snapshot with a TTL. `Set` seeds `avg_latency_ms`
//! directly on the first sample and exponentially smooths it thereafter
//! with `(prev + new) / 2`, the same idiom a per-component health cache in
//! the wider ecosystem uses for its atomic-bool-plus-timestamp entries,
//! generalized here to one entry per backend URL instead of one entry per
//! infrastructure dependency.

use super::{hit_rate, CacheMetrics};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct HealthEntry {
    alive: bool,
    last_check: Instant,
    check_count: u64,
    error_count: u64,
    avg_latency_ms: f64,
}

pub struct HealthCache {
    entries: DashMap<String, HealthEntry>,
    ttl: Duration,
    enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl HealthCache {
    pub fn new(ttl: Duration, enabled: bool) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            enabled,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns `Some(alive)` iff the entry exists and is fresh; otherwise a
    /// miss, including when the cache is disabled.
    pub async fn get(&self, url: &str) -> Option<bool> {
        if !self.enabled {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        match self.entries.get(url) {
            Some(entry) if entry.last_check.elapsed() <= self.ttl => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.alive)
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Creates or updates the entry for `url`. A no-op when the cache is
    /// disabled, per the documented opt-out path.
    pub async fn set(&self, url: &str, alive: bool, latency_ms: u64) {
        if !self.enabled {
            return;
        }

        self.entries
            .entry(url.to_string())
            .and_modify(|entry| {
                entry.alive = alive;
                entry.last_check = Instant::now();
                entry.check_count += 1;
                if !alive {
                    entry.error_count += 1;
                }
                entry.avg_latency_ms = (entry.avg_latency_ms + latency_ms as f64) / 2.0;
            })
            .or_insert(HealthEntry {
                alive,
                last_check: Instant::now(),
                check_count: 1,
                error_count: if alive { 0 } else { 1 },
                avg_latency_ms: latency_ms as f64,
            });
    }

    pub async fn invalidate(&self, url: &str) {
        self.entries.remove(url);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn metrics(&self) -> CacheMetrics {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        CacheMetrics {
            hits,
            misses,
            size: self.entries.len(),
            hit_rate: hit_rate(hits, misses),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn miss_before_any_set() {
        let cache = HealthCache::new(Duration::from_secs(5), true);
        assert_eq!(cache.get("http://b1").await, None);
    }

    #[tokio::test]
    async fn hit_after_set_within_ttl() {
        let cache = HealthCache::new(Duration::from_millis(100), true);
        cache.set("http://b1", true, 10).await;
        assert_eq!(cache.get("http://b1").await, Some(true));
    }

    #[tokio::test]
    async fn expires_after_ttl() {
        let cache = HealthCache::new(Duration::from_millis(20), true);
        cache.set("http://b1", true, 10).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get("http://b1").await, None);
    }

    #[tokio::test]
    async fn disabled_cache_always_misses() {
        let cache = HealthCache::new(Duration::from_secs(5), false);
        cache.set("http://b1", true, 10).await;
        assert_eq!(cache.get("http://b1").await, None);
    }

    #[tokio::test]
    async fn avg_latency_smooths_after_first_sample() {
        let cache = HealthCache::new(Duration::from_secs(5), true);
        cache.set("http://b1", true, 100).await;
        cache.set("http://b1", true, 200).await;
        let entry = cache.entries.get("http://b1").unwrap();
        assert_eq!(entry.avg_latency_ms, 150.0);
    }

    #[tokio::test]
    async fn error_count_increments_only_on_down() {
        let cache = HealthCache::new(Duration::from_secs(5), true);
        cache.set("http://b1", false, 10).await;
        cache.set("http://b1", true, 10).await;
        let entry = cache.entries.get("http://b1").unwrap();
        assert_eq!(entry.error_count, 1);
        assert_eq!(entry.check_count, 2);
    }
}
