//! Message Router
//!
//! Dispatches decoded inbound frames by their `type` tag:
//!
//! | Type               | Handler                                   |
//! |--------------------|-------------------------------------------|
//! | `DATA_UPDATE`      | store readings in `LiveDataStore`         |
//! | `SUBSCRIPTION_ACK` | complete the pending subscribe            |
//! | `DEVICE_STATUS`    | update the device status table            |
//! | `HEARTBEAT`        | record latency and echo it back           |
//! | `ALERT`, `ERROR`   | publish as `MonitorEvent`                 |
//!
//! Frames that fail to decode are logged and dropped.

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::connection::ConnectionManager;
use crate::live::LiveDataStore;
use crate::metrics::PerformanceMonitor;
use crate::protocol::{
    DataUpdate, DeviceStatus, Heartbeat, Inbound, InboundMessage, MessageCodec, MessageType,
    Outbound, ServerError,
};
use crate::subscription::SubscriptionRegistry;

/// Notable inbound events, published to any listener
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MonitorEvent {
    DataUpdate { device_id: String, readings: usize },
    Alert { payload: serde_json::Value },
    DeviceStatus { device_id: String, status: String },
    SubscriptionAcknowledged { request_id: String, subscription_id: String },
    ServerError { code: String, message: String },
}

/// Routes inbound frames to their handlers
#[derive(Clone)]
pub struct MessageRouter {
    codec: MessageCodec,
    connection: ConnectionManager,
    subscriptions: SubscriptionRegistry,
    live: LiveDataStore,
    performance: PerformanceMonitor,
    events: broadcast::Sender<MonitorEvent>,
}

impl MessageRouter {
    pub fn new(
        connection: ConnectionManager,
        subscriptions: SubscriptionRegistry,
        live: LiveDataStore,
        performance: PerformanceMonitor,
        event_capacity: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            codec: MessageCodec::new(),
            connection,
            subscriptions,
            live,
            performance,
            events,
        }
    }

    /// Listen for routed events
    pub fn events(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    /// Route one text frame; returns the handled type, or `None` if dropped
    pub async fn route(&self, text: &str) -> Option<MessageType> {
        self.route_at(text, Utc::now().timestamp_millis()).await
    }

    /// Route one text frame as if received at `now` (epoch ms)
    pub async fn route_at(&self, text: &str, now: i64) -> Option<MessageType> {
        let message = match self.codec.decode(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, bytes = text.len(), "Dropping malformed message");
                self.performance.record_dropped().await;
                return None;
            }
        };

        let kind = message.body.kind();
        self.dispatch(message, now).await;
        self.performance.record_message().await;
        Some(kind)
    }

    async fn dispatch(&self, message: InboundMessage, now: i64) {
        let InboundMessage { meta, body } = message;

        match body {
            Inbound::DataUpdate(update) => self.on_data_update(update).await,
            Inbound::SubscriptionAck(ack) => match meta.request_id {
                Some(request_id) => {
                    if self
                        .subscriptions
                        .acknowledge(&request_id, &ack.subscription_id)
                        .await
                    {
                        self.publish(MonitorEvent::SubscriptionAcknowledged {
                            request_id,
                            subscription_id: ack.subscription_id,
                        });
                    }
                }
                None => {
                    tracing::debug!(subscription_id = %ack.subscription_id, "Ack without request id");
                }
            },
            Inbound::DeviceStatus(status) => self.on_device_status(status, meta.timestamp).await,
            Inbound::Heartbeat(heartbeat) => self.on_heartbeat(heartbeat, now).await,
            Inbound::Alert(payload) => {
                tracing::info!(message_id = %meta.message_id, "Alert received");
                self.publish(MonitorEvent::Alert { payload });
            }
            Inbound::Error(ServerError { code, message }) => {
                tracing::warn!(code = %code, message = %message, "Server reported error");
                self.publish(MonitorEvent::ServerError { code, message });
            }
        }
    }

    async fn on_data_update(&self, update: DataUpdate) {
        let DataUpdate { device_id, data } = update;
        let stored = self.live.ingest(&device_id, data).await;
        self.publish(MonitorEvent::DataUpdate {
            device_id,
            readings: stored,
        });
    }

    async fn on_device_status(&self, status: DeviceStatus, timestamp: i64) {
        self.live
            .update_device_status(&status.device_id, &status.status, timestamp)
            .await;
        tracing::debug!(device_id = %status.device_id, status = %status.status, "Device status");
        self.publish(MonitorEvent::DeviceStatus {
            device_id: status.device_id,
            status: status.status,
        });
    }

    async fn on_heartbeat(&self, heartbeat: Heartbeat, now: i64) {
        let latency = heartbeat.round_trip(now);
        self.performance.record_latency(latency).await;

        let echo = Outbound::Heartbeat(Heartbeat {
            client_timestamp: heartbeat.client_timestamp,
            server_timestamp: heartbeat.server_timestamp,
            latency: Some(latency),
        });
        if let Err(e) = self.connection.send(&echo, None).await {
            tracing::debug!(error = %e, "Heartbeat echo not sent");
        }
    }

    fn publish(&self, event: MonitorEvent) {
        // No listeners is fine
        let _ = self.events.send(event);
    }
}
