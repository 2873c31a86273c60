//! Message Codec
//!
//! Converts typed protocol messages to and from the JSON text frames used on
//! the live-data socket. Decoding is two-step: the envelope is parsed first,
//! then the payload is decoded according to the `type` tag.

use chrono::Utc;
use serde::de::DeserializeOwned;
use thiserror::Error;
use uuid::Uuid;

use super::messages::{
    Envelope, Inbound, InboundMessage, MessageMeta, MessageType, Outbound,
};

/// Errors produced while encoding or decoding frames
#[derive(Error, Debug)]
pub enum CodecError {
    /// The frame was not a valid envelope
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The envelope was valid but its payload did not match the type tag
    #[error("Invalid {kind} payload: {source}")]
    InvalidPayload {
        kind: MessageType,
        source: serde_json::Error,
    },

    /// A client-only message type arrived from the server
    #[error("Unexpected inbound message type: {0}")]
    UnexpectedType(MessageType),
}

/// Stateless JSON codec for protocol frames
#[derive(Debug, Clone, Default)]
pub struct MessageCodec;

impl MessageCodec {
    pub fn new() -> Self {
        Self
    }

    /// Encode an outbound message stamped with the current time and a fresh message ID
    pub fn encode(&self, message: &Outbound, request_id: Option<&str>) -> Result<String, CodecError> {
        self.encode_at(message, request_id, Utc::now().timestamp_millis())
    }

    /// Encode an outbound message with an explicit timestamp
    pub fn encode_at(
        &self,
        message: &Outbound,
        request_id: Option<&str>,
        timestamp: i64,
    ) -> Result<String, CodecError> {
        let payload = match message {
            Outbound::Handshake(p) => serde_json::to_value(p)?,
            Outbound::SubscriptionRequest(p) => serde_json::to_value(p)?,
            Outbound::Heartbeat(p) => serde_json::to_value(p)?,
        };

        let envelope = Envelope {
            kind: message.kind(),
            timestamp,
            request_id: request_id.map(str::to_string),
            message_id: Uuid::new_v4().to_string(),
            payload,
        };

        Ok(serde_json::to_string(&envelope)?)
    }

    /// Decode an inbound text frame
    pub fn decode(&self, text: &str) -> Result<InboundMessage, CodecError> {
        let envelope: Envelope = serde_json::from_str(text)?;
        let kind = envelope.kind;

        let body = match kind {
            MessageType::SubscriptionAck => {
                Inbound::SubscriptionAck(payload(kind, envelope.payload)?)
            }
            MessageType::DataUpdate => Inbound::DataUpdate(payload(kind, envelope.payload)?),
            MessageType::Alert => Inbound::Alert(envelope.payload),
            MessageType::DeviceStatus => Inbound::DeviceStatus(payload(kind, envelope.payload)?),
            MessageType::Heartbeat => Inbound::Heartbeat(payload(kind, envelope.payload)?),
            MessageType::Error => Inbound::Error(payload(kind, envelope.payload)?),
            MessageType::ConnectionHandshake | MessageType::SubscriptionRequest => {
                return Err(CodecError::UnexpectedType(kind));
            }
        };

        Ok(InboundMessage {
            meta: MessageMeta {
                timestamp: envelope.timestamp,
                request_id: envelope.request_id,
                message_id: envelope.message_id,
            },
            body,
        })
    }
}

fn payload<T: DeserializeOwned>(kind: MessageType, value: serde_json::Value) -> Result<T, CodecError> {
    serde_json::from_value(value).map_err(|source| CodecError::InvalidPayload { kind, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::{DataQuality, Handshake, Heartbeat, SubscriptionRequest};

    #[test]
    fn test_encode_handshake_envelope() {
        let codec = MessageCodec::new();
        let msg = Outbound::Handshake(Handshake {
            client_id: "bridge-console".to_string(),
            protocol_version: "1.0".to_string(),
            capabilities: vec!["data_update".to_string()],
        });

        let text = codec.encode_at(&msg, None, 1699000000000).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["type"], "CONNECTION_HANDSHAKE");
        assert_eq!(value["timestamp"], 1699000000000_i64);
        assert_eq!(value["payload"]["clientId"], "bridge-console");
        assert!(value.get("requestId").is_none());
        assert!(!value["messageId"].as_str().unwrap().is_empty());
    }

    #[test]
    fn test_encode_subscription_request_carries_request_id() {
        let codec = MessageCodec::new();
        let msg = Outbound::SubscriptionRequest(SubscriptionRequest {
            devices: vec!["ME-1".to_string()],
            parameters: vec!["rpm".to_string()],
            frequency: 500,
            quality_filter: vec![DataQuality::Normal, DataQuality::Estimated],
        });

        let text = codec.encode(&msg, Some("req-42")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["type"], "SUBSCRIPTION_REQUEST");
        assert_eq!(value["requestId"], "req-42");
        assert_eq!(value["payload"]["devices"][0], "ME-1");
    }

    #[test]
    fn test_message_ids_are_unique() {
        let codec = MessageCodec::new();
        let msg = Outbound::Heartbeat(Heartbeat::probe(1));
        let a: serde_json::Value = serde_json::from_str(&codec.encode(&msg, None).unwrap()).unwrap();
        let b: serde_json::Value = serde_json::from_str(&codec.encode(&msg, None).unwrap()).unwrap();
        assert_ne!(a["messageId"], b["messageId"]);
    }

    #[test]
    fn test_decode_data_update() {
        let codec = MessageCodec::new();
        let text = r#"{
            "type": "DATA_UPDATE",
            "timestamp": 1699000000000,
            "messageId": "m-1",
            "payload": {
                "deviceId": "ME-1",
                "data": [
                    {"timestamp": 1699000000000, "value": 720.0, "unit": "rpm",
                     "quality": "normal", "equipmentId": "ME-1", "metricType": "rpm"}
                ]
            }
        }"#;

        let msg = codec.decode(text).unwrap();
        assert_eq!(msg.meta.message_id, "m-1");
        match msg.body {
            Inbound::DataUpdate(update) => {
                assert_eq!(update.device_id, "ME-1");
                assert_eq!(update.data.len(), 1);
                assert_eq!(update.data[0].value, 720.0);
            }
            other => panic!("Expected DataUpdate, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_ack_keeps_request_id() {
        let codec = MessageCodec::new();
        let text = r#"{"type":"SUBSCRIPTION_ACK","timestamp":1,"requestId":"req-1","messageId":"m","payload":{"subscriptionId":"sub-9"}}"#;
        let msg = codec.decode(text).unwrap();
        assert_eq!(msg.meta.request_id.as_deref(), Some("req-1"));
        assert_eq!(msg.body.kind(), MessageType::SubscriptionAck);
    }

    #[test]
    fn test_decode_alert_is_opaque() {
        let codec = MessageCodec::new();
        let text = r#"{"type":"ALERT","timestamp":1,"payload":{"severity":"high","anything":[1,2]}}"#;
        let msg = codec.decode(text).unwrap();
        match msg.body {
            Inbound::Alert(value) => assert_eq!(value["severity"], "high"),
            other => panic!("Expected Alert, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let codec = MessageCodec::new();
        assert!(matches!(codec.decode("not json"), Err(CodecError::Malformed(_))));
        assert!(matches!(
            codec.decode(r#"{"type":"NOPE","timestamp":1}"#),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_rejects_mismatched_payload() {
        let codec = MessageCodec::new();
        let text = r#"{"type":"DEVICE_STATUS","timestamp":1,"payload":{"unexpected":true}}"#;
        let err = codec.decode(text).unwrap_err();
        assert!(matches!(
            err,
            CodecError::InvalidPayload { kind: MessageType::DeviceStatus, .. }
        ));
    }

    #[test]
    fn test_decode_rejects_client_only_type() {
        let codec = MessageCodec::new();
        let text = r#"{"type":"CONNECTION_HANDSHAKE","timestamp":1,"payload":{}}"#;
        assert!(matches!(
            codec.decode(text),
            Err(CodecError::UnexpectedType(MessageType::ConnectionHandshake))
        ));
    }
}
