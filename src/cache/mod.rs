//! # Cache Manager
//!
//! Owns the three TTL caches the load balancer is built around: health,
//! stats, and routing. Generalizes the single-purpose LLM response cache
//! the reference crate shipped into three purpose-built caches, each with
//! its own freshness rule, while keeping the hit/miss-counter-plus-hit-rate
//! shape of the original `CacheStats`.

pub mod health;
pub mod routing;
pub mod stats;

pub use health::HealthCache;
pub use routing::RoutingCache;
pub use stats::{BackendStat, StatsCache};

use crate::config::Config;
use serde::Serialize;

/// Hit/miss/size/hit-rate snapshot, shared shape across all three caches.
/// Field names on the wire (`hit_count`/`miss_count`) match the documented
/// `/cache-metrics` surface rather than the shorter internal field names.
#[derive(Debug, Clone, Serialize)]
pub struct CacheMetrics {
    #[serde(rename = "hit_count")]
    pub hits: u64,
    #[serde(rename = "miss_count")]
    pub misses: u64,
    pub size: usize,
    pub hit_rate: f64,
}

/// `hits / (hits + misses) * 100`, per the documented hit-rate definition.
pub(crate) fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64 * 100.0
    }
}

/// All metrics for the three caches, as returned by the `/cache-metrics`
/// admin endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct AllCacheMetrics {
    pub health: CacheMetrics,
    pub stats: CacheMetrics,
    pub routing: CacheMetrics,
}

pub struct CacheManager {
    pub health: HealthCache,
    pub stats: StatsCache,
    pub routing: RoutingCache,
}

impl CacheManager {
    pub fn new(config: &Config) -> Self {
        Self {
            health: HealthCache::new(config.health_cache_ttl(), config.health_cache_enabled),
            stats: StatsCache::new(config.stats_cache_ttl(), config.stats_cache_enabled),
            routing: RoutingCache::new(config.routing_cache_ttl(), config.routing_cache_enabled),
        }
    }

    pub async fn get_all_metrics(&self) -> AllCacheMetrics {
        AllCacheMetrics {
            health: self.health.metrics(),
            stats: self.stats.metrics().await,
            routing: self.routing.metrics().await,
        }
    }

    pub async fn invalidate_all(&self) {
        self.health.clear();
        self.stats.mark_dirty();
        self.routing.invalidate().await;
    }
}
