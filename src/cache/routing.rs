//! # Routing Cache
//!
//! Holds the last-observed set of alive backends so peer selection can
//! avoid a full pool scan on every request. A monotonic `version` counter
//! bumps on every `set` and `invalidate`, generalizing the round-robin
//! `AtomicUsize` index the reference crate's request router used for a
//! flat adapter list into a cache the server pool can invalidate out from
//! under the counter.

use super::{hit_rate, CacheMetrics};
use crate::backend::Backend;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

pub struct RoutingCache {
    ttl: Duration,
    enabled: bool,
    backends: RwLock<Vec<Arc<Backend>>>,
    last_update: RwLock<Instant>,
    version: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RoutingCache {
    pub fn new(ttl: Duration, enabled: bool) -> Self {
        Self {
            ttl,
            enabled,
            backends: RwLock::new(Vec::new()),
            last_update: RwLock::new(Instant::now().checked_sub(ttl).unwrap_or_else(Instant::now)),
            version: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Fresh iff enabled, non-empty, and within TTL. Empty entries report a
    /// miss even when technically within TTL, so a zero-backend state never
    /// masks a live routing miss.
    pub async fn get(&self) -> Option<Vec<Arc<Backend>>> {
        if !self.enabled {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let backends = self.backends.read().await;
        if backends.is_empty() {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let last_update = *self.last_update.read().await;
        if last_update.elapsed() <= self.ttl {
            self.hits.fetch_add(1, Ordering::Relaxed);
            Some(backends.clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Stores a defensive copy of `backends` (pointer copies of the shared
    /// `Arc<Backend>`s) so a caller mutating its own slice afterward cannot
    /// corrupt the cached state.
    pub async fn set(&self, backends: &[Arc<Backend>]) {
        *self.backends.write().await = backends.to_vec();
        *self.last_update.write().await = Instant::now();
        self.version.fetch_add(1, Ordering::SeqCst);
    }

    pub async fn invalidate(&self) {
        self.backends.write().await.clear();
        self.version.fetch_add(1, Ordering::SeqCst);
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub async fn metrics(&self) -> CacheMetrics {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        CacheMetrics {
            hits,
            misses,
            size: self.backends.read().await.len(),
            hit_rate: hit_rate(hits, misses),
        }
    }
}
