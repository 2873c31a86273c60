//! # Enginewatch
//!
//! Engine-room monitoring data core - keeps a live connection to the ship's
//! monitoring server, manages device/metric subscriptions, buffers recent
//! readings and caches historical time-series queries.
//!
//! ## Features
//!
//! - **Persistent connection**: handshake, heartbeat and exponential-backoff reconnect
//! - **Subscriptions**: request/ack correlation with hard timeouts
//! - **Live buffers**: bounded per-device ring buffers with data-quality tallies
//! - **Query cache**: TTL entries with expiry-order eviction
//! - **Retry**: historical fetches retried with linear backoff
//!
//! ## Modules
//!
//! - [`protocol`]: Wire messages and the JSON codec
//! - [`connection`]: Connection lifecycle and transport
//! - [`subscription`]: Subscription registry
//! - [`router`]: Inbound message dispatch
//! - [`query`]: Historical queries, cache and REST client
//! - [`live`]: Live reading buffers
//! - [`monitor`]: The service that owns all of the above
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use enginewatch::{Config, MonitoringService, Query, SubscribeOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = MonitoringService::from_config(Config::load_default(), None).await?;
//!     service.connect("operator-token").await?;
//!
//!     // Stream main engine RPM
//!     service
//!         .subscribe(&["ME-1".into()], &["rpm".into()], SubscribeOptions::default())
//!         .await?;
//!
//!     // Last hour of exhaust temperature, served from cache on repeat
//!     let now = chrono::Utc::now().timestamp_millis();
//!     let query = Query::new("ME-1", now - 3_600_000, now)?.metric("exhaust_temp");
//!     let result = service.execute_query(&query).await?;
//!     println!("{} readings", result.data_points.len());
//!
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod live;
pub mod metrics;
pub mod monitor;
pub mod protocol;
pub mod query;
pub mod router;
pub mod subscription;
pub mod telemetry;

// Re-export top-level types for convenience
pub use config::{Config, ConfigError, LoggingConfig};

pub use connection::{
    ConnectionError, ConnectionManager, ConnectionState, Connector, CredentialProvider,
    ErrorCallback, WsConnector,
};

pub use live::{DataQualityTally, LiveDataStore, LiveUpdate, RingBuffer};

pub use metrics::{PerformanceMetrics, PerformanceMonitor};

pub use monitor::{MonitorError, MonitorResult, MonitoringService};

pub use protocol::{CodecError, DataQuality, MessageCodec, MessageType, MetricReading};

pub use query::{
    Aggregation, ExportFormat, Granularity, HistorySource, HttpHistoryClient, Query,
    QueryCache, QueryError, QueryExecutor, QueryResult, TimeRange,
};

pub use router::{MessageRouter, MonitorEvent};

pub use subscription::{SubscribeOptions, Subscription, SubscriptionError, SubscriptionRegistry};
