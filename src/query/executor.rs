//! Query Executor
//!
//! Runs historical queries through the cache, falling back to the history
//! service on a miss:
//!
//! ```text
//! Query → Cache lookup ─hit→ Result (cached)
//!                      └miss→ Fetch (per metric) → Merge → Cache store → Result
//! ```
//!
//! Failed fetches are retried with linear backoff (`base * (retry + 1)`);
//! the error only reaches the caller once retries are used up.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use super::cache::QueryCache;
use super::client::{HistorySource, PageRequest};
use super::error::{QueryError, QueryOutcome};
use super::types::{ExportFormat, Query, QueryResult};
use crate::config::ApiConfig;
use crate::metrics::PerformanceMonitor;

/// Query executor
pub struct QueryExecutor {
    cache: Arc<QueryCache>,
    source: Arc<dyn HistorySource>,
    config: ApiConfig,
    performance: PerformanceMonitor,
    in_flight: AtomicUsize,
}

/// Marks a query as loading until dropped
struct LoadingGuard<'a>(&'a AtomicUsize);

impl<'a> LoadingGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl QueryExecutor {
    pub fn new(
        cache: Arc<QueryCache>,
        source: Arc<dyn HistorySource>,
        config: ApiConfig,
        performance: PerformanceMonitor,
    ) -> Self {
        Self {
            cache,
            source,
            config,
            performance,
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    /// True while at least one query is executing
    pub fn is_loading(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Execute a query, serving from cache when possible
    pub async fn execute_query(&self, query: &Query) -> QueryOutcome<QueryResult> {
        if query.metric_types.is_empty() {
            return Err(QueryError::InvalidParameter(
                "query has no metric types".to_string(),
            ));
        }

        let _loading = LoadingGuard::new(&self.in_flight);
        let mut retry_count: u32 = 0;

        loop {
            // Only the first lookup counts toward hit/miss
            let cached = if retry_count == 0 {
                self.cache.get(query).await
            } else {
                self.cache.peek(query).await
            };
            if let Some(hit) = cached {
                return Ok(hit);
            }

            match self.fetch(query).await {
                Ok(result) => {
                    self.cache.set(query, result.clone()).await;
                    tracing::debug!(
                        signature = %query.signature(),
                        points = result.data_points.len(),
                        execution_time_ms = result.execution_time_ms,
                        "Query fetched"
                    );
                    return Ok(result);
                }
                Err(e) if retry_count < self.config.max_retries => {
                    let delay = self.config.retry_base_delay() * (retry_count + 1);
                    tracing::warn!(
                        device_id = %query.device_id,
                        retry = retry_count + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Query fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
                Err(e) => {
                    tracing::error!(
                        device_id = %query.device_id,
                        attempts = retry_count + 1,
                        error = %e,
                        "Query failed"
                    );
                    return Err(if retry_count == 0 {
                        e
                    } else {
                        QueryError::RetriesExhausted {
                            attempts: retry_count + 1,
                            last: Box::new(e),
                        }
                    });
                }
            }
        }
    }

    /// One fetch attempt: first page of every metric, merged by timestamp
    async fn fetch(&self, query: &Query) -> QueryOutcome<QueryResult> {
        let start = Instant::now();
        let outcome = self.fetch_pages(query).await;
        let elapsed = start.elapsed();
        self.performance.record_fetch(elapsed).await;

        let (data_points, total, total_pages) = outcome?;
        Ok(QueryResult {
            query: query.clone(),
            data_points,
            total,
            page: 1,
            page_size: self.config.page_size,
            total_pages,
            execution_time_ms: elapsed.as_millis() as u64,
            cached: false,
        })
    }

    async fn fetch_pages(
        &self,
        query: &Query,
    ) -> QueryOutcome<(Vec<crate::protocol::MetricReading>, u64, u32)> {
        let mut items = Vec::new();
        let mut total = 0u64;
        let mut total_pages = 0u32;

        for metric in query.metric_set() {
            let request = PageRequest::for_metric(query, &metric, 1, self.config.page_size);
            let page = self.source.fetch_page(&request).await?;
            total += page.total;
            total_pages = total_pages.max(page.total_pages);
            items.extend(page.items);
        }

        items.sort_by_key(|r| r.timestamp);
        Ok((items, total, total_pages))
    }

    /// Export a query's readings; never cached
    pub async fn export(&self, query: &Query, format: ExportFormat) -> QueryOutcome<Vec<u8>> {
        let _loading = LoadingGuard::new(&self.in_flight);
        self.source.export(query, format).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::protocol::MetricReading;
    use crate::query::types::HistoryPage;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    /// Fails the first `failures` fetches, then serves one reading per metric
    struct FlakySource {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakySource {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HistorySource for FlakySource {
        async fn fetch_page(&self, request: &PageRequest) -> QueryOutcome<HistoryPage> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(QueryError::Api {
                    status: 503,
                    message: "busy".to_string(),
                });
            }
            let ts = if request.metric_type == "rpm" { 20 } else { 10 };
            Ok(HistoryPage {
                items: vec![MetricReading::new(
                    &request.equipment_id,
                    &request.metric_type,
                    1.0,
                    ts,
                )],
                total: 1,
                page: request.page,
                page_size: request.page_size,
                total_pages: 1,
            })
        }

        async fn export(&self, _query: &Query, format: ExportFormat) -> QueryOutcome<Vec<u8>> {
            Ok(format.as_str().as_bytes().to_vec())
        }
    }

    fn executor(source: Arc<FlakySource>) -> QueryExecutor {
        let performance = PerformanceMonitor::new();
        let cache = Arc::new(QueryCache::new(CacheConfig::default(), performance.clone()));
        QueryExecutor::new(cache, source, ApiConfig::default(), performance)
    }

    fn query() -> Query {
        Query::new("ME-1", 0, 1_000).unwrap().metric("rpm")
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt() {
        let source = FlakySource::new(2);
        let exec = executor(Arc::clone(&source));

        let started = tokio::time::Instant::now();
        let result = exec.execute_query(&query()).await.unwrap();

        assert!(!result.cached);
        assert_eq!(result.data_points.len(), 1);
        assert_eq!(source.calls(), 3);
        // 1s + 2s linear backoff
        assert!(started.elapsed() >= Duration::from_millis(3000));
        assert!(!exec.is_loading());

        let stats = exec.cache().stats().await;
        assert_eq!((stats.hits, stats.misses), (0, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_surfaces_after_retries() {
        let source = FlakySource::new(u32::MAX);
        let exec = executor(Arc::clone(&source));

        let err = exec.execute_query(&query()).await.unwrap_err();

        assert!(matches!(err, QueryError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(source.calls(), 3);
        assert!(!exec.is_loading());
        assert!(exec.cache().is_empty().await);
    }

    #[tokio::test]
    async fn test_second_call_served_from_cache() {
        let source = FlakySource::new(0);
        let exec = executor(Arc::clone(&source));

        let first = exec.execute_query(&query()).await.unwrap();
        let second = exec.execute_query(&query()).await.unwrap();

        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(first.data_points, second.data_points);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_multi_metric_merge_sorted() {
        let source = FlakySource::new(0);
        let exec = executor(Arc::clone(&source));
        let q = Query::new("ME-1", 0, 1_000).unwrap().metrics(["rpm", "temp"]);

        let result = exec.execute_query(&q).await.unwrap();

        assert_eq!(source.calls(), 2);
        assert_eq!(result.total, 2);
        let stamps: Vec<i64> = result.data_points.iter().map(|r| r.timestamp).collect();
        assert_eq!(stamps, vec![10, 20]);
    }

    #[tokio::test]
    async fn test_query_without_metrics_rejected() {
        let source = FlakySource::new(0);
        let exec = executor(Arc::clone(&source));
        let q = Query::new("ME-1", 0, 1_000).unwrap();

        assert!(matches!(
            exec.execute_query(&q).await,
            Err(QueryError::InvalidParameter(_))
        ));
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_export_passthrough() {
        let exec = executor(FlakySource::new(0));
        let blob = exec.export(&query(), ExportFormat::Csv).await.unwrap();
        assert_eq!(blob, b"csv".to_vec());
    }
}
