//! Performance Monitor
//!
//! Rolling counters fed by the query cache, the query executor and the
//! live-data connection. Averages are running means, so the first sample
//! needs no special case.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Snapshot of all performance counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Completed REST fetches (successful or not)
    pub fetch_count: u64,
    pub average_fetch_time_ms: f64,
    pub messages_processed: u64,
    /// Inbound frames that failed to decode
    pub messages_dropped: u64,
    pub latency_samples: u64,
    pub average_latency_ms: f64,
    pub last_latency_ms: Option<i64>,
    /// Processed messages per second since the monitor was created
    pub throughput: f64,
    /// Timestamp (ms) of the most recent update to any counter
    pub last_update: Option<i64>,
}

impl PerformanceMetrics {
    /// Fraction of cache lookups that were hits, 0.0 when there were none
    pub fn hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }

    fn touch(&mut self) {
        self.last_update = Some(Utc::now().timestamp_millis());
    }
}

fn running_mean(mean: f64, count: u64, sample: f64) -> f64 {
    mean + (sample - mean) / count as f64
}

/// Shared handle to the performance counters
#[derive(Debug, Clone)]
pub struct PerformanceMonitor {
    metrics: Arc<RwLock<PerformanceMetrics>>,
    started: Instant,
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(RwLock::new(PerformanceMetrics::default())),
            started: Instant::now(),
        }
    }

    pub async fn record_cache_hit(&self) {
        let mut m = self.metrics.write().await;
        m.cache_hits += 1;
        m.touch();
    }

    pub async fn record_cache_miss(&self) {
        let mut m = self.metrics.write().await;
        m.cache_misses += 1;
        m.touch();
    }

    /// Record the wall time of one REST fetch
    pub async fn record_fetch(&self, elapsed: Duration) {
        let mut m = self.metrics.write().await;
        m.fetch_count += 1;
        m.average_fetch_time_ms = running_mean(
            m.average_fetch_time_ms,
            m.fetch_count,
            elapsed.as_secs_f64() * 1000.0,
        );
        m.touch();
    }

    pub async fn record_message(&self) {
        let mut m = self.metrics.write().await;
        m.messages_processed += 1;
        m.touch();
    }

    pub async fn record_dropped(&self) {
        let mut m = self.metrics.write().await;
        m.messages_dropped += 1;
        m.touch();
    }

    /// Record a heartbeat round-trip latency in milliseconds
    pub async fn record_latency(&self, latency_ms: i64) {
        let latency_ms = latency_ms.max(0);
        let mut m = self.metrics.write().await;
        m.latency_samples += 1;
        m.average_latency_ms =
            running_mean(m.average_latency_ms, m.latency_samples, latency_ms as f64);
        m.last_latency_ms = Some(latency_ms);
        m.touch();
    }

    pub async fn snapshot(&self) -> PerformanceMetrics {
        let mut snapshot = self.metrics.read().await.clone();
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed > f64::EPSILON {
            snapshot.throughput = snapshot.messages_processed as f64 / elapsed;
        }
        snapshot
    }
}
