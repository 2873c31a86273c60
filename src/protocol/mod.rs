//! Live-Data Protocol
//!
//! Message types and the JSON codec used on the monitoring socket.
//!
//! Every frame is an envelope `{type, timestamp, requestId, messageId, payload}`:
//!
//! | Type | Direction |
//! |---|---|
//! | `CONNECTION_HANDSHAKE` | out |
//! | `SUBSCRIPTION_REQUEST` | out |
//! | `SUBSCRIPTION_ACK` | in |
//! | `DATA_UPDATE` | in |
//! | `ALERT` | in |
//! | `DEVICE_STATUS` | in |
//! | `HEARTBEAT` | both |
//! | `ERROR` | in |

mod codec;
mod messages;

pub use codec::{CodecError, MessageCodec};
pub use messages::{
    DataQuality, DataUpdate, DeviceStatus, Envelope, Handshake, Heartbeat, Inbound,
    InboundMessage, MessageMeta, MessageType, MetricReading, Outbound, ServerError,
    SubscriptionAck, SubscriptionRequest,
};
