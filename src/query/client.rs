//! History REST Client
//!
//! The historical-data service is an external collaborator. `HistorySource`
//! is the seam the executor fetches through; `HttpHistoryClient` implements
//! it over the paginated REST endpoint.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};

use super::error::{QueryError, QueryOutcome};
use super::types::{Aggregation, ExportFormat, Granularity, HistoryPage, Query};
use crate::config::ApiConfig;
use crate::connection::CredentialProvider;

/// One request against the paginated history endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub equipment_id: String,
    pub metric_type: String,
    pub start_time: i64,
    pub end_time: i64,
    pub page: u32,
    pub page_size: u32,
    pub granularity: Granularity,
    pub aggregation: Aggregation,
}

impl PageRequest {
    /// Page request for one metric of `query`
    pub fn for_metric(query: &Query, metric_type: &str, page: u32, page_size: u32) -> Self {
        Self {
            equipment_id: query.device_id.clone(),
            metric_type: metric_type.to_string(),
            start_time: query.start_time,
            end_time: query.end_time,
            page,
            page_size,
            granularity: query.granularity,
            aggregation: query.aggregation,
        }
    }
}

/// Source of historical readings
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Fetch one page of readings for one metric
    async fn fetch_page(&self, request: &PageRequest) -> QueryOutcome<HistoryPage>;

    /// Export the readings for a query as a binary document
    async fn export(&self, query: &Query, format: ExportFormat) -> QueryOutcome<Vec<u8>>;
}

/// REST implementation of `HistorySource`
pub struct HttpHistoryClient {
    client: Client,
    base_url: String,
    credentials: Option<CredentialProvider>,
}

impl HttpHistoryClient {
    pub fn new(config: &ApiConfig) -> QueryOutcome<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(QueryError::Request)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credentials: None,
        })
    }

    /// Attach a bearer token provider
    pub fn with_credentials(mut self, credentials: CredentialProvider) -> Self {
        self.credentials = Some(credentials);
        self
    }

    fn metrics_url(&self, equipment_id: &str) -> String {
        format!(
            "{}/api/v1/equipment/{}/metrics",
            self.base_url,
            urlencoding::encode(equipment_id)
        )
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.credentials.as_ref().and_then(|provider| provider()) {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> QueryOutcome<reqwest::Response> {
        let response = self
            .authorize(builder)
            .send()
            .await
            .map_err(QueryError::from_reqwest)?;

        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            Err(QueryError::Api {
                status: status.as_u16(),
                message: text,
            })
        }
    }
}

#[async_trait]
impl HistorySource for HttpHistoryClient {
    async fn fetch_page(&self, request: &PageRequest) -> QueryOutcome<HistoryPage> {
        let url = self.metrics_url(&request.equipment_id);
        let builder = self.client.get(&url).query(&[
            ("metricType", request.metric_type.clone()),
            ("startTime", request.start_time.to_string()),
            ("endTime", request.end_time.to_string()),
            ("page", request.page.to_string()),
            ("pageSize", request.page_size.to_string()),
            ("granularity", request.granularity.to_string()),
            ("aggregation", request.aggregation.to_string()),
        ]);

        tracing::debug!(
            equipment_id = %request.equipment_id,
            metric_type = %request.metric_type,
            page = request.page,
            "Fetching history page"
        );

        let response = self.send(builder).await?;
        response.json().await.map_err(QueryError::from_reqwest)
    }

    async fn export(&self, query: &Query, format: ExportFormat) -> QueryOutcome<Vec<u8>> {
        let url = format!("{}/export", self.metrics_url(&query.device_id));
        let builder = self.client.get(&url).query(&[
            ("metricTypes", query.metric_set().join(",")),
            ("startTime", query.start_time.to_string()),
            ("endTime", query.end_time.to_string()),
            ("format", format.as_str().to_string()),
        ]);

        tracing::debug!(device_id = %query.device_id, format = format.as_str(), "Exporting history");

        let response = self.send(builder).await?;
        let bytes = response.bytes().await.map_err(QueryError::from_reqwest)?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_page_request_for_metric() {
        let query = Query::new("ME-1", 10, 20)
            .unwrap()
            .metrics(["rpm", "temp"])
            .granularity(Granularity::Hour);
        let req = PageRequest::for_metric(&query, "temp", 1, 500);

        assert_eq!(req.equipment_id, "ME-1");
        assert_eq!(req.metric_type, "temp");
        assert_eq!(req.page_size, 500);
        assert_eq!(req.granularity, Granularity::Hour);
    }

    #[test]
    fn test_metrics_url_encodes_equipment() {
        let config = ApiConfig {
            base_url: "http://history:8080/".to_string(),
            ..ApiConfig::default()
        };
        let client = HttpHistoryClient::new(&config).unwrap();
        assert_eq!(
            client.metrics_url("ME 1/A"),
            "http://history:8080/api/v1/equipment/ME%201%2FA/metrics"
        );
    }

    #[test]
    fn test_credentials_attach() {
        let client = HttpHistoryClient::new(&ApiConfig::default())
            .unwrap()
            .with_credentials(Arc::new(|| Some("secret".to_string())));
        let request = client
            .authorize(client.client.get("http://localhost/x"))
            .build()
            .unwrap();
        assert_eq!(
            request.headers().get("authorization").unwrap(),
            "Bearer secret"
        );
    }
}
