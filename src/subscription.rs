//! Subscription Registry
//!
//! Tracks live-data subscriptions and correlates SUBSCRIPTION_ACK messages
//! with the requests that caused them. Each subscribe call parks a oneshot
//! sender under a fresh request id; the router completes it when the
//! matching ack arrives, or the caller's timeout removes it.
//!
//! The registry resets itself whenever the live link ends, so nothing
//! survives a reconnect.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Weak};

use futures_util::FutureExt;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};
use uuid::Uuid;

use crate::config::SubscriptionConfig;
use crate::connection::{ConnectionError, ConnectionManager};
use crate::protocol::{DataQuality, Outbound, SubscriptionRequest};

/// Subscription errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SubscriptionError {
    #[error("Subscription {request_id} not acknowledged within {timeout_ms}ms")]
    Timeout { request_id: String, timeout_ms: u64 },

    #[error("Subscription {request_id} cancelled: connection lost")]
    Cancelled { request_id: String },

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// A subscription to device/metric streams
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub request_id: String,
    /// Server-assigned id, set on acknowledgement
    pub subscription_id: Option<String>,
    pub device_ids: Vec<String>,
    pub metric_types: Vec<String>,
    pub frequency_ms: u64,
    pub acknowledged: bool,
}

/// Optional subscribe parameters
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Update frequency; the configured default when unset
    pub frequency_ms: Option<u64>,
    pub quality_filter: Vec<DataQuality>,
}

struct Pending {
    subscription: Subscription,
    ack: oneshot::Sender<Subscription>,
}

#[derive(Default)]
struct RegistryState {
    pending: HashMap<String, Pending>,
    active: HashMap<String, Subscription>,
}

/// Shared subscription table
#[derive(Clone)]
pub struct SubscriptionRegistry {
    connection: ConnectionManager,
    config: SubscriptionConfig,
    state: Arc<Mutex<RegistryState>>,
}

impl SubscriptionRegistry {
    pub fn new(connection: ConnectionManager, config: SubscriptionConfig) -> Self {
        let state = Arc::new(Mutex::new(RegistryState::default()));

        let weak: Weak<Mutex<RegistryState>> = Arc::downgrade(&state);
        connection.on_session_end(Arc::new(move || {
            let weak = weak.clone();
            async move {
                if let Some(state) = weak.upgrade() {
                    let dropped = reset_state(&state).await;
                    tracing::info!(dropped, "Connection lost, subscriptions dropped");
                }
            }
            .boxed()
        }));

        Self {
            connection,
            config,
            state,
        }
    }

    /// Subscribe and wait for the server's acknowledgement
    pub async fn subscribe(
        &self,
        device_ids: &[String],
        metric_types: &[String],
        options: SubscribeOptions,
    ) -> Result<Subscription, SubscriptionError> {
        let request_id = Uuid::new_v4().to_string();
        let frequency_ms = options
            .frequency_ms
            .unwrap_or(self.config.default_frequency_ms);

        let subscription = Subscription {
            request_id: request_id.clone(),
            subscription_id: None,
            device_ids: device_ids.to_vec(),
            metric_types: metric_types.to_vec(),
            frequency_ms,
            acknowledged: false,
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        self.state.lock().await.pending.insert(
            request_id.clone(),
            Pending {
                subscription,
                ack: ack_tx,
            },
        );

        let request = Outbound::SubscriptionRequest(SubscriptionRequest {
            devices: device_ids.to_vec(),
            parameters: metric_types.to_vec(),
            frequency: frequency_ms,
            quality_filter: options.quality_filter,
        });

        if let Err(e) = self.connection.send(&request, Some(&request_id)).await {
            self.state.lock().await.pending.remove(&request_id);
            tracing::warn!(request_id = %request_id, error = %e, "Subscription request not sent");
            return Err(e.into());
        }

        tracing::debug!(
            request_id = %request_id,
            devices = device_ids.len(),
            metrics = metric_types.len(),
            "Subscription requested"
        );

        match tokio::time::timeout(self.config.timeout(), ack_rx).await {
            Ok(Ok(subscription)) => Ok(subscription),
            Ok(Err(_)) => Err(SubscriptionError::Cancelled { request_id }),
            Err(_) => {
                self.state.lock().await.pending.remove(&request_id);
                tracing::warn!(request_id = %request_id, "Subscription timed out");
                Err(SubscriptionError::Timeout {
                    request_id,
                    timeout_ms: self.config.subscription_timeout_ms,
                })
            }
        }
    }

    /// Complete the pending subscribe for `request_id`
    ///
    /// Returns false for stale or unknown request ids.
    pub async fn acknowledge(&self, request_id: &str, subscription_id: &str) -> bool {
        let mut state = self.state.lock().await;
        let Some(pending) = state.pending.remove(request_id) else {
            tracing::debug!(request_id = %request_id, "Ignoring stale subscription ack");
            return false;
        };

        let mut subscription = pending.subscription;
        subscription.subscription_id = Some(subscription_id.to_string());
        subscription.acknowledged = true;

        if pending.ack.send(subscription.clone()).is_err() {
            tracing::debug!(request_id = %request_id, "Subscriber gone before ack");
            return false;
        }

        tracing::info!(
            request_id = %request_id,
            subscription_id = %subscription_id,
            "Subscription acknowledged"
        );
        state.active.insert(request_id.to_string(), subscription);
        true
    }

    /// Stop streaming `device_ids`, or everything when `None`
    ///
    /// Local state is updated first; the server is told the remaining set
    /// without waiting for a reply.
    pub async fn unsubscribe(&self, device_ids: Option<&[String]>) -> Result<(), SubscriptionError> {
        let (devices, parameters) = {
            let mut state = self.state.lock().await;
            match device_ids {
                None => {
                    state.active.clear();
                    (Vec::new(), Vec::new())
                }
                Some(ids) => {
                    state.active.retain(|_, sub| {
                        sub.device_ids.retain(|d| !ids.contains(d));
                        !sub.device_ids.is_empty()
                    });
                    let devices: BTreeSet<String> = state
                        .active
                        .values()
                        .flat_map(|s| s.device_ids.iter().cloned())
                        .collect();
                    let parameters: BTreeSet<String> = state
                        .active
                        .values()
                        .flat_map(|s| s.metric_types.iter().cloned())
                        .collect();
                    (devices.into_iter().collect(), parameters.into_iter().collect())
                }
            }
        };

        tracing::info!(remaining_devices = devices.len(), "Unsubscribing");

        let request = Outbound::SubscriptionRequest(SubscriptionRequest {
            devices,
            parameters,
            frequency: self.config.default_frequency_ms,
            quality_filter: Vec::new(),
        });
        let request_id = Uuid::new_v4().to_string();
        self.connection.send(&request, Some(&request_id)).await?;
        Ok(())
    }

    /// Drop all pending and active subscriptions; pending callers see `Cancelled`
    pub async fn reset(&self) -> usize {
        reset_state(&self.state).await
    }

    /// Acknowledged subscriptions
    pub async fn active(&self) -> Vec<Subscription> {
        let state = self.state.lock().await;
        let mut subs: Vec<Subscription> = state.active.values().cloned().collect();
        subs.sort_by(|a, b| a.request_id.cmp(&b.request_id));
        subs
    }

    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn is_subscribed(&self, device_id: &str) -> bool {
        self.state
            .lock()
            .await
            .active
            .values()
            .any(|s| s.device_ids.iter().any(|d| d == device_id))
    }
}

/// Drop pending and active subscriptions; pending subscribers see `Cancelled`
async fn reset_state(state: &Mutex<RegistryState>) -> usize {
    let mut state = state.lock().await;
    let dropped = state.pending.len() + state.active.len();
    state.pending.clear();
    state.active.clear();
    if dropped > 0 {
        tracing::debug!(dropped, "Subscriptions reset");
    }
    dropped
}
