//! Connection error types

use thiserror::Error;

/// Errors raised by the live-data connection
///
/// These are reported through the error callback and never abort the
/// reconnect state machine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Send failed: connection closed")]
    SendFailed,

    #[error("Failed to encode message: {0}")]
    Encode(String),

    /// A newer connect or an explicit disconnect replaced this attempt
    #[error("Connection attempt superseded")]
    Superseded,
}
