//! Query error types
//!
//! Defines all error conditions that can occur while building, fetching or
//! exporting historical queries.

use thiserror::Error;

/// Errors that can occur during query operations
#[derive(Error, Debug)]
pub enum QueryError {
    /// Query start is not before its end
    #[error("Invalid time range: {start} >= {end}")]
    InvalidTimeRange { start: i64, end: i64 },

    /// A query parameter could not be used
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// History service could not be reached
    #[error("History service unavailable")]
    Unavailable,

    /// History service did not answer in time
    #[error("Request timeout")]
    Timeout,

    /// Transport-level HTTP failure
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// History service answered with a non-success status
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// All retries used up
    #[error("Query failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<QueryError>,
    },
}

impl QueryError {
    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            QueryError::Timeout
        } else if e.is_connect() {
            QueryError::Unavailable
        } else {
            QueryError::Request(e)
        }
    }
}

/// Result type for query operations
pub type QueryOutcome<T> = Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = QueryError::InvalidTimeRange { start: 5, end: 1 };
        assert_eq!(err.to_string(), "Invalid time range: 5 >= 1");

        let err = QueryError::RetriesExhausted {
            attempts: 3,
            last: Box::new(QueryError::Api {
                status: 503,
                message: "busy".to_string(),
            }),
        };
        assert_eq!(
            err.to_string(),
            "Query failed after 3 attempts: API error 503: busy"
        );
    }
}
