//! Protocol Message Types
//!
//! Defines the envelope shared by every message on the live-data socket and
//! the typed payloads carried inside it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Type tag carried in the `type` field of every envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    ConnectionHandshake,
    SubscriptionRequest,
    SubscriptionAck,
    DataUpdate,
    Alert,
    DeviceStatus,
    Heartbeat,
    Error,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::ConnectionHandshake => "CONNECTION_HANDSHAKE",
            MessageType::SubscriptionRequest => "SUBSCRIPTION_REQUEST",
            MessageType::SubscriptionAck => "SUBSCRIPTION_ACK",
            MessageType::DataUpdate => "DATA_UPDATE",
            MessageType::Alert => "ALERT",
            MessageType::DeviceStatus => "DEVICE_STATUS",
            MessageType::Heartbeat => "HEARTBEAT",
            MessageType::Error => "ERROR",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire envelope: `{type, timestamp, requestId, messageId, payload}`
///
/// The payload is kept as raw JSON until the codec knows which type to
/// decode it into.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Sender timestamp in milliseconds
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Fields common to every decoded message
#[derive(Debug, Clone, PartialEq)]
pub struct MessageMeta {
    pub timestamp: i64,
    pub request_id: Option<String>,
    pub message_id: String,
}

/// Quality flag attached to each reading by the acquisition layer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataQuality {
    #[default]
    Normal,
    Estimated,
    Questionable,
    Bad,
}

/// A single measurement from a piece of equipment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricReading {
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    pub value: f64,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub quality: DataQuality,
    pub equipment_id: String,
    pub metric_type: String,
}

impl MetricReading {
    pub fn new(equipment_id: &str, metric_type: &str, value: f64, timestamp: i64) -> Self {
        Self {
            timestamp,
            value,
            unit: String::new(),
            quality: DataQuality::Normal,
            equipment_id: equipment_id.to_string(),
            metric_type: metric_type.to_string(),
        }
    }

    pub fn unit(mut self, unit: &str) -> Self {
        self.unit = unit.to_string();
        self
    }

    pub fn quality(mut self, quality: DataQuality) -> Self {
        self.quality = quality;
        self
    }
}

// ============================================
// Outbound payloads
// ============================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub client_id: String,
    pub protocol_version: String,
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRequest {
    pub devices: Vec<String>,
    pub parameters: Vec<String>,
    /// Requested update frequency in milliseconds
    pub frequency: u64,
    #[serde(default)]
    pub quality_filter: Vec<DataQuality>,
}

/// Heartbeat, sent in both directions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub client_timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency: Option<i64>,
}

impl Heartbeat {
    /// A fresh client-originated heartbeat
    pub fn probe(client_timestamp: i64) -> Self {
        Self {
            client_timestamp,
            server_timestamp: None,
            latency: None,
        }
    }

    /// Round-trip latency observed at `now`, clamped to zero for skewed clocks
    pub fn round_trip(&self, now: i64) -> i64 {
        now.saturating_sub(self.client_timestamp).max(0)
    }
}

// ============================================
// Inbound payloads
// ============================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionAck {
    pub subscription_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataUpdate {
    pub device_id: String,
    #[serde(default)]
    pub data: Vec<MetricReading>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    pub device_id: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// Messages this client sends
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Handshake(Handshake),
    SubscriptionRequest(SubscriptionRequest),
    Heartbeat(Heartbeat),
}

impl Outbound {
    pub fn kind(&self) -> MessageType {
        match self {
            Outbound::Handshake(_) => MessageType::ConnectionHandshake,
            Outbound::SubscriptionRequest(_) => MessageType::SubscriptionRequest,
            Outbound::Heartbeat(_) => MessageType::Heartbeat,
        }
    }
}

/// Messages this client accepts
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    SubscriptionAck(SubscriptionAck),
    DataUpdate(DataUpdate),
    /// Alert payload, opaque to the data core
    Alert(serde_json::Value),
    DeviceStatus(DeviceStatus),
    Heartbeat(Heartbeat),
    Error(ServerError),
}

impl Inbound {
    pub fn kind(&self) -> MessageType {
        match self {
            Inbound::SubscriptionAck(_) => MessageType::SubscriptionAck,
            Inbound::DataUpdate(_) => MessageType::DataUpdate,
            Inbound::Alert(_) => MessageType::Alert,
            Inbound::DeviceStatus(_) => MessageType::DeviceStatus,
            Inbound::Heartbeat(_) => MessageType::Heartbeat,
            Inbound::Error(_) => MessageType::Error,
        }
    }
}

/// A decoded inbound message
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub meta: MessageMeta,
    pub body: Inbound,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_wire_names() {
        let json = serde_json::to_string(&MessageType::SubscriptionAck).unwrap();
        assert_eq!(json, "\"SUBSCRIPTION_ACK\"");

        let kind: MessageType = serde_json::from_str("\"DATA_UPDATE\"").unwrap();
        assert_eq!(kind, MessageType::DataUpdate);
        assert_eq!(kind.to_string(), "DATA_UPDATE");
    }

    #[test]
    fn test_metric_reading_deserialize() {
        let json = r#"{
            "timestamp": 1699000000000,
            "value": 82.5,
            "unit": "degC",
            "quality": "estimated",
            "equipmentId": "ME-1",
            "metricType": "exhaust_temp"
        }"#;
        let reading: MetricReading = serde_json::from_str(json).unwrap();
        assert_eq!(reading.equipment_id, "ME-1");
        assert_eq!(reading.quality, DataQuality::Estimated);
        assert_eq!(reading.value, 82.5);
    }

    #[test]
    fn test_metric_reading_defaults_quality() {
        let json = r#"{"timestamp": 1, "value": 1.0, "equipmentId": "G-2", "metricType": "rpm"}"#;
        let reading: MetricReading = serde_json::from_str(json).unwrap();
        assert_eq!(reading.quality, DataQuality::Normal);
        assert!(reading.unit.is_empty());
    }

    #[test]
    fn test_subscription_request_serialize() {
        let req = SubscriptionRequest {
            devices: vec!["ME-1".to_string()],
            parameters: vec!["rpm".to_string()],
            frequency: 1000,
            quality_filter: vec![DataQuality::Normal],
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"qualityFilter\":[\"normal\"]"));
        assert!(json.contains("\"frequency\":1000"));
    }

    #[test]
    fn test_heartbeat_round_trip_clamps() {
        let hb = Heartbeat::probe(1000);
        assert_eq!(hb.round_trip(1100), 100);
        assert_eq!(hb.round_trip(900), 0);

        let skewed = Heartbeat::probe(i64::MIN);
        assert_eq!(skewed.round_trip(1_700_000_000_000), i64::MAX);
        assert_eq!(Heartbeat::probe(i64::MAX).round_trip(i64::MIN), 0);
    }
}
