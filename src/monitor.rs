//! Monitoring Service
//!
//! The explicitly constructed owner of the whole data core. One instance per
//! process holds the connection, subscriptions, live buffers, query cache and
//! performance counters, and runs two background tasks:
//!
//! - dispatch: inbound frames → `MessageRouter`
//! - cache sweep: periodic removal of expired entries
//!
//! Local subscriptions are dropped by the registry itself when the live
//! link ends.
//!
//! Background tasks are aborted when the service is dropped.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::config::{Config, ConfigError};
use crate::connection::{
    ConnectionError, ConnectionManager, ConnectionState, Connector, CredentialProvider,
    InboundFrames, WsConnector,
};
use crate::live::LiveDataStore;
use crate::metrics::PerformanceMonitor;
use crate::query::{
    ExportFormat, HistorySource, HttpHistoryClient, Query, QueryCache, QueryError,
    QueryExecutor, QueryResult,
};
use crate::router::{MessageRouter, MonitorEvent};
use crate::subscription::{SubscribeOptions, Subscription, SubscriptionError, SubscriptionRegistry};

/// Top-level error for service operations
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type MonitorResult<T> = Result<T, MonitorError>;

/// Monitoring data core
pub struct MonitoringService {
    config: Config,
    connection: ConnectionManager,
    subscriptions: SubscriptionRegistry,
    router: MessageRouter,
    live: LiveDataStore,
    executor: QueryExecutor,
    performance: PerformanceMonitor,
    tasks: Vec<JoinHandle<()>>,
}

impl MonitoringService {
    /// Assemble the service over the given transport and history source
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: Config, connector: Arc<dyn Connector>, history: Arc<dyn HistorySource>) -> Self {
        let performance = PerformanceMonitor::new();
        let (connection, frames) = ConnectionManager::new(config.connection.clone(), connector);
        let subscriptions = SubscriptionRegistry::new(connection.clone(), config.subscription.clone());
        let live = LiveDataStore::new(config.live.clone());
        let router = MessageRouter::new(
            connection.clone(),
            subscriptions.clone(),
            live.clone(),
            performance.clone(),
            config.live.listener_capacity,
        );
        let cache = Arc::new(QueryCache::new(config.cache.clone(), performance.clone()));
        let executor = QueryExecutor::new(
            Arc::clone(&cache),
            history,
            config.api.clone(),
            performance.clone(),
        );

        let tasks = vec![
            tokio::spawn(dispatch(router.clone(), frames)),
            cache.start_cleanup(),
        ];

        tracing::info!(
            url = %config.connection.url,
            api = %config.api.base_url,
            "Monitoring service ready"
        );

        Self {
            config,
            connection,
            subscriptions,
            router,
            live,
            executor,
            performance,
            tasks,
        }
    }

    /// Service over WebSocket and the REST history API
    pub async fn from_config(
        config: Config,
        credentials: Option<CredentialProvider>,
    ) -> MonitorResult<Self> {
        let mut history = HttpHistoryClient::new(&config.api)?;
        if let Some(provider) = credentials.clone() {
            history = history.with_credentials(provider);
        }

        let service = Self::new(config, Arc::new(WsConnector), Arc::new(history));
        if let Some(provider) = credentials {
            service.connection.set_credentials(provider).await;
        }
        Ok(service)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ---- connection ----

    pub async fn connect(&self, token: &str) -> MonitorResult<()> {
        self.connection.connect(token).await?;
        Ok(())
    }

    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    // ---- subscriptions ----

    pub async fn subscribe(
        &self,
        device_ids: &[String],
        metric_types: &[String],
        options: SubscribeOptions,
    ) -> MonitorResult<Subscription> {
        Ok(self
            .subscriptions
            .subscribe(device_ids, metric_types, options)
            .await?)
    }

    pub async fn unsubscribe(&self, device_ids: Option<&[String]>) -> MonitorResult<()> {
        Ok(self.subscriptions.unsubscribe(device_ids).await?)
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    // ---- queries ----

    pub async fn execute_query(&self, query: &Query) -> MonitorResult<QueryResult> {
        Ok(self.executor.execute_query(query).await?)
    }

    pub async fn export(&self, query: &Query, format: ExportFormat) -> MonitorResult<Vec<u8>> {
        Ok(self.executor.export(query, format).await?)
    }

    pub fn is_loading(&self) -> bool {
        self.executor.is_loading()
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        self.executor.cache()
    }

    // ---- live data ----

    pub fn live(&self) -> &LiveDataStore {
        &self.live
    }

    pub fn events(&self) -> broadcast::Receiver<MonitorEvent> {
        self.router.events()
    }

    pub fn performance(&self) -> &PerformanceMonitor {
        &self.performance
    }

    /// Drop cached queries, live buffers, tallies and local subscriptions
    pub async fn clear(&self) {
        self.executor.cache().clear().await;
        self.live.clear().await;
        self.subscriptions.reset().await;
        tracing::info!("Monitoring state cleared");
    }

    /// Disconnect and stop background tasks
    pub async fn shutdown(self) {
        self.connection.disconnect().await;
        tracing::info!("Monitoring service shut down");
    }
}

impl Drop for MonitoringService {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn dispatch(router: MessageRouter, mut frames: InboundFrames) {
    while let Some(text) = frames.recv().await {
        router.route(&text).await;
    }
    tracing::debug!("Inbound frame stream ended");
}
