//! Historical query types
//!
//! - `Query`: an immutable request for a device's metric history
//! - `QueryResult`: one page of readings plus paging metadata
//! - `TimeRange`: inclusive timestamp bounds

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::error::QueryError;
use crate::protocol::MetricReading;

/// Inclusive time interval in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    /// Returns None if start > end
    pub fn new(start: i64, end: i64) -> Option<Self> {
        if start <= end {
            Some(Self { start, end })
        } else {
            None
        }
    }

    /// Range covering the last N minutes up to now
    pub fn last_minutes(minutes: i64) -> Self {
        let end = chrono::Utc::now().timestamp_millis();
        Self {
            start: end - minutes * 60 * 1000,
            end,
        }
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }
}

/// Bucket width requested from the history endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    Raw,
    Minute,
    Hour,
    Day,
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Raw => write!(f, "raw"),
            Self::Minute => write!(f, "minute"),
            Self::Hour => write!(f, "hour"),
            Self::Day => write!(f, "day"),
        }
    }
}

impl FromStr for Granularity {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "raw" => Ok(Self::Raw),
            "minute" | "1m" => Ok(Self::Minute),
            "hour" | "1h" => Ok(Self::Hour),
            "day" | "1d" => Ok(Self::Day),
            other => Err(QueryError::InvalidParameter(format!("granularity '{}'", other))),
        }
    }
}

/// Aggregation applied within each bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    #[default]
    Avg,
    Min,
    Max,
    Sum,
    Count,
}

impl std::fmt::Display for Aggregation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Avg => write!(f, "avg"),
            Self::Min => write!(f, "min"),
            Self::Max => write!(f, "max"),
            Self::Sum => write!(f, "sum"),
            Self::Count => write!(f, "count"),
        }
    }
}

impl FromStr for Aggregation {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "avg" | "average" => Ok(Self::Avg),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "sum" => Ok(Self::Sum),
            "count" => Ok(Self::Count),
            other => Err(QueryError::InvalidParameter(format!("aggregation '{}'", other))),
        }
    }
}

/// A historical query. Built once, then only read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub device_id: String,
    pub metric_types: Vec<String>,
    pub start_time: i64,
    pub end_time: i64,
    pub granularity: Granularity,
    pub aggregation: Aggregation,
}

impl Query {
    /// Start building a query for one device over `[start_time, end_time]`
    pub fn new(device_id: &str, start_time: i64, end_time: i64) -> Result<Self, QueryError> {
        if device_id.trim().is_empty() {
            return Err(QueryError::InvalidParameter("empty device id".to_string()));
        }
        if start_time >= end_time {
            return Err(QueryError::InvalidTimeRange {
                start: start_time,
                end: end_time,
            });
        }

        Ok(Self {
            device_id: device_id.to_string(),
            metric_types: Vec::new(),
            start_time,
            end_time,
            granularity: Granularity::default(),
            aggregation: Aggregation::default(),
        })
    }

    pub fn metric(mut self, metric_type: &str) -> Self {
        self.metric_types.push(metric_type.to_string());
        self
    }

    pub fn metrics<I, S>(mut self, metric_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metric_types
            .extend(metric_types.into_iter().map(Into::into));
        self
    }

    pub fn granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    /// Metric types as a sorted, de-duplicated list
    pub fn metric_set(&self) -> Vec<String> {
        let mut metrics = self.metric_types.clone();
        metrics.sort();
        metrics.dedup();
        metrics
    }

    /// Deterministic cache key; metric order does not matter
    ///
    /// Encoded as a JSON array so separators inside ids cannot collide.
    pub fn signature(&self) -> String {
        serde_json::json!([
            self.device_id,
            self.metric_set(),
            self.start_time,
            self.end_time,
            self.granularity.to_string(),
            self.aggregation.to_string(),
        ])
        .to_string()
    }

    pub fn time_range(&self) -> TimeRange {
        TimeRange {
            start: self.start_time,
            end: self.end_time,
        }
    }
}

/// One page of a historical query result
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub query: Query,
    pub data_points: Vec<MetricReading>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
    pub execution_time_ms: u64,
    /// True when served from the query cache
    pub cached: bool,
}

/// Response body of the paginated history endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    #[serde(default)]
    pub items: Vec<MetricReading>,
    #[serde(default)]
    pub total: u64,
    #[serde(default = "first_page")]
    pub page: u32,
    #[serde(default)]
    pub page_size: u32,
    #[serde(default)]
    pub total_pages: u32,
}

fn first_page() -> u32 {
    1
}

/// Formats offered by the export endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Excel,
    Json,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Excel => "xlsx",
            Self::Json => "json",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "xlsx" | "excel" => Ok(Self::Excel),
            "json" => Ok(Self::Json),
            other => Err(QueryError::InvalidParameter(format!("export format '{}'", other))),
        }
    }
}
