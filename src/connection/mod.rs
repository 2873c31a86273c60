//! Live-data Connection
//!
//! One persistent socket to the ship's monitoring server with handshake,
//! heartbeat and bounded exponential-backoff reconnect.
//!
//! - **State**: `ConnectionState` and the backoff schedule
//! - **Transport**: the `Connector` seam and its WebSocket implementation
//! - **Manager**: lifecycle, sending and inbound frame delivery

mod error;
mod manager;
mod state;
pub(crate) mod transport;

pub use error::ConnectionError;
pub use manager::{
    ConnectionManager, CredentialProvider, ErrorCallback, InboundFrames, SessionEndHook,
};
pub use state::{backoff_delay, ConnectionState};
pub use transport::{Connector, TransportEvent, TransportLink, WsConnector};
