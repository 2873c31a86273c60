//! Query Cache
//!
//! Caches historical query results keyed by `Query::signature()`.
//!
//! - Entries live for a fixed TTL from insertion; reads never extend it.
//! - Expired entries are removed lazily on lookup and by a periodic sweep.
//! - When full, inserting a new signature evicts the entry that expires
//!   soonest (expiry order, not access order).

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use super::types::{Query, QueryResult};
use crate::config::CacheConfig;
use crate::metrics::PerformanceMonitor;

/// A stored result and its expiry time
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub signature: String,
    pub result: QueryResult,
    /// Unix timestamp in milliseconds
    pub expires_at: i64,
}

/// Cache occupancy and hit statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub max_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// Source of the current time in epoch milliseconds
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

pub struct QueryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    config: CacheConfig,
    performance: PerformanceMonitor,
    clock: Clock,
}

impl QueryCache {
    pub fn new(config: CacheConfig, performance: PerformanceMonitor) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            config,
            performance,
            clock: Arc::new(|| Utc::now().timestamp_millis()),
        }
    }

    /// Replace the wall clock used for expiry
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn now(&self) -> i64 {
        (self.clock)()
    }

    fn ttl_millis(&self) -> i64 {
        i64::try_from(self.config.ttl().as_millis()).unwrap_or(i64::MAX)
    }

    /// Look up a cached result
    pub async fn get(&self, query: &Query) -> Option<QueryResult> {
        self.get_at(query, self.now()).await
    }

    /// Look up a cached result as of `now` (milliseconds)
    ///
    /// Hits come back with `cached = true`. An expired entry is removed and
    /// counted as a miss.
    pub async fn get_at(&self, query: &Query, now: i64) -> Option<QueryResult> {
        let found = self.lookup_at(query, now).await;

        if found.is_some() {
            self.performance.record_cache_hit().await;
            tracing::trace!("Cache hit");
        } else {
            self.performance.record_cache_miss().await;
            tracing::trace!("Cache miss");
        }
        found
    }

    /// Look up a cached result without touching the hit/miss counters
    pub async fn peek(&self, query: &Query) -> Option<QueryResult> {
        self.lookup_at(query, self.now()).await
    }

    async fn lookup_at(&self, query: &Query, now: i64) -> Option<QueryResult> {
        let signature = query.signature();
        let mut entries = self.entries.write().await;

        let fresh = entries.get(&signature).map(|entry| now < entry.expires_at);
        let found = match fresh {
            Some(true) => entries.get(&signature).map(|entry| {
                let mut result = entry.result.clone();
                result.cached = true;
                result
            }),
            Some(false) => {
                entries.remove(&signature);
                tracing::debug!(signature = %signature, "Cache entry expired");
                None
            }
            None => None,
        };
        found
    }

    /// Store a result for its query
    pub async fn set(&self, query: &Query, result: QueryResult) {
        self.set_at(query, result, self.now()).await
    }

    /// Store a result as of `now`; it expires at `now + ttl`
    ///
    /// Writing an existing signature replaces it (last write wins) without
    /// evicting anything else.
    pub async fn set_at(&self, query: &Query, result: QueryResult, now: i64) {
        if self.config.max_cache_size == 0 {
            return;
        }

        let signature = query.signature();
        let mut entries = self.entries.write().await;

        if !entries.contains_key(&signature) && entries.len() >= self.config.max_cache_size {
            let victim = entries
                .values()
                .min_by(|a, b| {
                    a.expires_at
                        .cmp(&b.expires_at)
                        .then_with(|| a.signature.cmp(&b.signature))
                })
                .map(|entry| entry.signature.clone());

            if let Some(victim) = victim {
                entries.remove(&victim);
                tracing::debug!(evicted = %victim, "Cache full, evicted earliest-expiring entry");
            }
        }

        let expires_at = now.saturating_add(self.ttl_millis());
        entries.insert(
            signature.clone(),
            CacheEntry {
                signature,
                result,
                expires_at,
            },
        );
    }

    /// Expiry time of the entry for `query`, if cached
    pub async fn expires_at(&self, query: &Query) -> Option<i64> {
        self.entries
            .read()
            .await
            .get(&query.signature())
            .map(|entry| entry.expires_at)
    }

    /// Remove every entry with `expires_at <= now`, returning how many were removed
    pub async fn cleanup_expired_at(&self, now: i64) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    pub async fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(self.now()).await
    }

    /// Spawn the periodic expiry sweep
    pub fn start_cleanup(self: Arc<Self>) -> JoinHandle<()> {
        let interval = self
            .config
            .cleanup_interval()
            .max(std::time::Duration::from_secs(1));
        tracing::debug!(interval_secs = interval.as_secs(), "Starting cache cleanup task");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // Skip the first immediate tick
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let removed = self.cleanup_expired().await;
                if removed > 0 {
                    tracing::debug!(removed, "Cache cleanup removed expired entries");
                }
            }
        })
    }

    /// Drop all entries
    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        let count = entries.len();
        entries.clear();
        tracing::debug!(count, "Query cache cleared");
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn contains(&self, query: &Query) -> bool {
        self.entries.read().await.contains_key(&query.signature())
    }

    pub async fn stats(&self) -> CacheStats {
        let metrics = self.performance.snapshot().await;
        CacheStats {
            entries: self.len().await,
            max_entries: self.config.max_cache_size,
            hits: metrics.cache_hits,
            misses: metrics.cache_misses,
            hit_rate: metrics.hit_rate(),
        }
    }
}
