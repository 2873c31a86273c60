//! Transport seam
//!
//! `ConnectionManager` talks to the wire through a `Connector`. Each opened
//! link is a pair of channels: text frames go out on `outbound`, frames and
//! lifecycle events come back on `inbound`. Dropping `outbound` closes the
//! link with a normal close frame.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::{frame::coding::CloseCode, CloseFrame, Message};
use url::Url;

use super::error::ConnectionError;

/// Event delivered by an open link
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Text frame from the server
    Text(String),
    /// Non-fatal transport error; a `Closed` event follows if the link died
    Error(String),
    /// Link closed; `normal` is true for a 1000 close
    Closed { normal: bool },
}

/// An open link to the server
pub struct TransportLink {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Opens links to the live-data server
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, url: &Url) -> Result<TransportLink, ConnectionError>;
}

/// WebSocket connector over tokio-tungstenite
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, url: &Url) -> Result<TransportLink, ConnectionError> {
        let (stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| ConnectionError::ConnectFailed(e.to_string()))?;

        tracing::debug!(host = url.host_str().unwrap_or_default(), "WebSocket opened");

        let (mut write, mut read) = stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<TransportEvent>();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = out_rx.recv() => match outgoing {
                        Some(text) => {
                            if let Err(e) = write.send(Message::Text(text)).await {
                                let _ = in_tx.send(TransportEvent::Error(e.to_string()));
                                let _ = in_tx.send(TransportEvent::Closed { normal: false });
                                break;
                            }
                        }
                        None => {
                            let frame = CloseFrame {
                                code: CloseCode::Normal,
                                reason: "client disconnect".into(),
                            };
                            let _ = write.send(Message::Close(Some(frame))).await;
                            let _ = in_tx.send(TransportEvent::Closed { normal: true });
                            break;
                        }
                    },
                    incoming = read.next() => match incoming {
                        Some(Ok(Message::Text(text))) => {
                            let _ = in_tx.send(TransportEvent::Text(text));
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let normal = frame.map_or(false, |f| f.code == CloseCode::Normal);
                            let _ = in_tx.send(TransportEvent::Closed { normal });
                            break;
                        }
                        Some(Ok(Message::Binary(data))) => {
                            tracing::debug!(bytes = data.len(), "Ignoring binary frame");
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            let _ = in_tx.send(TransportEvent::Error(e.to_string()));
                            let _ = in_tx.send(TransportEvent::Closed { normal: false });
                            break;
                        }
                        None => {
                            let _ = in_tx.send(TransportEvent::Closed { normal: false });
                            break;
                        }
                    },
                }
            }
        });

        Ok(TransportLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
