//! # Stats Cache
//!
//! A snapshot of per-backend `(url, alive, success_count, fail_count)`
//! rows, refreshed on demand and invalidated by a `dirty` flag rather than
//! (only) TTL expiry: any pool mutation marks the snapshot dirty so the
//! next `/stats` call recomputes instead of serving a stale backend list.

use super::{hit_rate, CacheMetrics};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize)]
pub struct BackendStat {
    pub url: String,
    pub alive: bool,
    pub success_count: u64,
    pub fail_count: u64,
}

pub struct StatsCache {
    ttl: Duration,
    enabled: bool,
    snapshot: RwLock<Vec<BackendStat>>,
    last_update: RwLock<Instant>,
    dirty: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl StatsCache {
    pub fn new(ttl: Duration, enabled: bool) -> Self {
        Self {
            ttl,
            enabled,
            snapshot: RwLock::new(Vec::new()),
            last_update: RwLock::new(Instant::now().checked_sub(ttl).unwrap_or_else(Instant::now)),
            dirty: AtomicBool::new(true),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Fresh iff enabled, not dirty, and within TTL.
    pub async fn get(&self) -> Option<Vec<BackendStat>> {
        if !self.enabled || self.dirty.load(Ordering::SeqCst) {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let last_update = *self.last_update.read().await;
        if last_update.elapsed() <= self.ttl {
            self.hits.fetch_add(1, Ordering::Relaxed);
            Some(self.snapshot.read().await.clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    pub async fn set(&self, snapshot: Vec<BackendStat>) {
        *self.snapshot.write().await = snapshot;
        *self.last_update.write().await = Instant::now();
        self.dirty.store(false, Ordering::SeqCst);
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    pub async fn metrics(&self) -> CacheMetrics {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        CacheMetrics {
            hits,
            misses,
            size: self.snapshot.read().await.len(),
            hit_rate: hit_rate(hits, misses),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(url: &str) -> BackendStat {
        BackendStat {
            url: url.to_string(),
            alive: true,
            success_count: 0,
            fail_count: 0,
        }
    }

    #[tokio::test]
    async fn starts_dirty_and_misses() {
        let cache = StatsCache::new(Duration::from_secs(5), true);
        assert!(cache.get().await.is_none());
    }

    #[tokio::test]
    async fn hit_after_set() {
        let cache = StatsCache::new(Duration::from_secs(5), true);
        cache.set(vec![stat("http://b1")]).await;
        assert_eq!(cache.get().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn mark_dirty_forces_miss() {
        let cache = StatsCache::new(Duration::from_secs(5), true);
        cache.set(vec![stat("http://b1")]).await;
        cache.mark_dirty();
        assert!(cache.get().await.is_none());
    }

    #[tokio::test]
    async fn expires_after_ttl() {
        let cache = StatsCache::new(Duration::from_millis(20), true);
        cache.set(vec![stat("http://b1")]).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get().await.is_none());
    }
}
