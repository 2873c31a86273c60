//! Historical Queries
//!
//! Cached access to the historical-data REST service:
//!
//! - **Types**: `Query` (immutable, identified by its signature) and `QueryResult`
//! - **Cache**: TTL cache with expiry-order eviction
//! - **Client**: `HistorySource` seam and its REST implementation
//! - **Executor**: cache-first execution with linear-backoff retry
//!
//! # Example
//!
//! ```rust,ignore
//! use enginewatch::query::{Query, Granularity};
//!
//! let query = Query::new("ME-1", start, end)?
//!     .metrics(["exhaust_temp", "rpm"])
//!     .granularity(Granularity::Minute);
//!
//! let result = executor.execute_query(&query).await?;
//! ```

mod cache;
mod client;
mod error;
mod executor;
mod types;

pub use cache::{CacheEntry, CacheStats, Clock, QueryCache};
pub use client::{HistorySource, HttpHistoryClient, PageRequest};
pub use error::{QueryError, QueryOutcome};
pub use executor::QueryExecutor;
pub use types::{
    Aggregation, ExportFormat, Granularity, HistoryPage, Query, QueryResult, TimeRange,
};
