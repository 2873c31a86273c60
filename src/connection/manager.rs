//! Connection Manager
//!
//! Owns the single live-data link and its lifecycle:
//!
//! ```text
//! DISCONNECTED ─connect→ CONNECTING ─open→ CONNECTED ─drop→ RECONNECTING ─open→ CONNECTED
//!                            │                  │                 │
//!                            └─fail→ ERROR      └─disconnect→ DISCONNECTED
//!                                                                 └─attempts exhausted→ ERROR
//! ```
//!
//! Every `connect` starts a new generation. One supervisor task per
//! generation pumps inbound frames, sends heartbeats and schedules
//! reconnects; a bumped generation silences anything still in flight.
//!
//! When an established link goes away the session-end hook runs to
//! completion before the state leaves CONNECTED.

use std::sync::Arc;

use chrono::Utc;
use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use url::Url;

use super::error::ConnectionError;
use super::state::{backoff_delay, ConnectionState};
use super::transport::{Connector, TransportEvent};
use crate::config::ConnectionConfig;
use crate::protocol::{Handshake, Heartbeat, MessageCodec, Outbound};

/// Supplies the current auth token; consulted on every (re)connect
pub type CredentialProvider = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// Invoked for every connection error
pub type ErrorCallback = Arc<dyn Fn(&ConnectionError) + Send + Sync>;

/// Awaited each time an established link ends (close, disconnect or replacement)
pub type SessionEndHook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Raw text frames received from the server, in arrival order
pub type InboundFrames = mpsc::UnboundedReceiver<String>;

/// Shared handle to the live-data connection
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    codec: MessageCodec,
    state: watch::Sender<ConnectionState>,
    frames: mpsc::UnboundedSender<String>,
    session: Mutex<Session>,
    credentials: RwLock<Option<CredentialProvider>>,
    on_error: RwLock<Option<ErrorCallback>>,
    session_end: std::sync::RwLock<Option<SessionEndHook>>,
}

#[derive(Default)]
struct Session {
    generation: u64,
    token: Option<String>,
    outbound: Option<mpsc::UnboundedSender<String>>,
    reconnect_attempts: u32,
    manual_disconnect: bool,
    supervisor: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    /// Create a manager and the stream its inbound frames arrive on
    pub fn new(config: ConnectionConfig, connector: Arc<dyn Connector>) -> (Self, InboundFrames) {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (frames, inbound) = mpsc::unbounded_channel();

        let inner = Inner {
            config,
            connector,
            codec: MessageCodec::new(),
            state,
            frames,
            session: Mutex::new(Session::default()),
            credentials: RwLock::new(None),
            on_error: RwLock::new(None),
            session_end: std::sync::RwLock::new(None),
        };

        (
            Self {
                inner: Arc::new(inner),
            },
            inbound,
        )
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Observe state transitions
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Consecutive reconnect attempts since the last successful open
    pub async fn reconnect_attempts(&self) -> u32 {
        self.inner.session.lock().await.reconnect_attempts
    }

    /// Use `provider` instead of the connect token when reconnecting
    pub async fn set_credentials(&self, provider: CredentialProvider) {
        *self.inner.credentials.write().await = Some(provider);
    }

    pub async fn set_error_callback(&self, callback: ErrorCallback) {
        *self.inner.on_error.write().await = Some(callback);
    }

    /// Replace the hook run when an established link ends
    pub fn on_session_end(&self, hook: SessionEndHook) {
        if let Ok(mut slot) = self.inner.session_end.write() {
            *slot = Some(hook);
        }
    }

    /// Open the connection, replacing any existing one
    ///
    /// Failure of the first open is returned and reported, and the
    /// reconnect schedule still runs.
    pub async fn connect(&self, token: &str) -> Result<(), ConnectionError> {
        if let Err(e) = self.inner.url_with_token(Some(token)) {
            self.inner.report_error(&e).await;
            return Err(e);
        }

        let (generation, replaced) = {
            let mut session = self.inner.session.lock().await;
            if let Some(handle) = session.supervisor.take() {
                handle.abort();
            }
            let replaced = session.outbound.take().is_some();
            session.generation += 1;
            session.token = Some(token.to_string());
            session.manual_disconnect = false;
            session.reconnect_attempts = 0;
            (session.generation, replaced)
        };
        if replaced {
            self.inner.end_session().await;
        }

        self.inner.set_state(ConnectionState::Connecting);
        tracing::info!(url = %self.inner.config.url, generation, "Connecting");

        let (inbound, outcome) = match self.inner.establish(generation).await {
            Ok(inbound) => (Some(inbound), Ok(())),
            Err(ConnectionError::Superseded) => return Err(ConnectionError::Superseded),
            Err(e) => {
                self.inner.report_error(&e).await;
                (None, Err(e))
            }
        };

        let handle = tokio::spawn(Arc::clone(&self.inner).supervise(generation, inbound));
        let mut session = self.inner.session.lock().await;
        if session.generation == generation {
            session.supervisor = Some(handle);
        } else {
            handle.abort();
        }

        outcome
    }

    /// Close the connection without scheduling a reconnect
    pub async fn disconnect(&self) {
        let ended = {
            let mut session = self.inner.session.lock().await;
            session.manual_disconnect = true;
            session.generation += 1;
            session.reconnect_attempts = 0;
            if let Some(handle) = session.supervisor.take() {
                handle.abort();
            }
            session.outbound.take().is_some()
        };
        if ended {
            self.inner.end_session().await;
        }
        self.inner.set_state(ConnectionState::Disconnected);
        tracing::info!("Disconnected");
    }

    /// Send a message; fails unless CONNECTED
    pub async fn send(
        &self,
        message: &Outbound,
        request_id: Option<&str>,
    ) -> Result<(), ConnectionError> {
        self.inner.send(message, request_id).await
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                tracing::debug!(from = %current, to = %state, "Connection state changed");
                *current = state;
                true
            }
        });
    }

    fn url_with_token(&self, token: Option<&str>) -> Result<Url, ConnectionError> {
        let mut url =
            Url::parse(&self.config.url).map_err(|e| ConnectionError::InvalidUrl(e.to_string()))?;
        if let Some(token) = token {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(url)
    }

    async fn report_error(&self, error: &ConnectionError) {
        tracing::warn!(error = %error, "Connection error");
        self.set_state(ConnectionState::Error);
        let callback = self.on_error.read().await.clone();
        if let Some(callback) = callback {
            callback(error);
        }
    }

    async fn end_session(&self) {
        let hook = self.session_end.read().ok().and_then(|slot| slot.clone());
        if let Some(hook) = hook {
            hook().await;
        }
    }

    async fn current_token(&self) -> Option<String> {
        let provider = self.credentials.read().await.clone();
        if let Some(token) = provider.and_then(|provider| provider()) {
            return Some(token);
        }
        self.session.lock().await.token.clone()
    }

    /// Open a link and send the handshake
    async fn establish(
        &self,
        generation: u64,
    ) -> Result<mpsc::UnboundedReceiver<TransportEvent>, ConnectionError> {
        let token = self.current_token().await;
        let url = self.url_with_token(token.as_deref())?;
        let link = self.connector.open(&url).await?;

        let handshake = Outbound::Handshake(Handshake {
            client_id: self.config.client_id.clone(),
            protocol_version: self.config.protocol_version.clone(),
            capabilities: self.config.capabilities.clone(),
        });
        let frame = self
            .codec
            .encode(&handshake, None)
            .map_err(|e| ConnectionError::Encode(e.to_string()))?;
        link.outbound
            .send(frame)
            .map_err(|_| ConnectionError::SendFailed)?;

        {
            let mut session = self.session.lock().await;
            if session.generation != generation || session.manual_disconnect {
                return Err(ConnectionError::Superseded);
            }
            session.outbound = Some(link.outbound);
            session.reconnect_attempts = 0;
        }

        self.set_state(ConnectionState::Connected);
        tracing::info!(client_id = %self.config.client_id, "Connected");
        Ok(link.inbound)
    }

    async fn is_current(&self, generation: u64) -> bool {
        self.session.lock().await.generation == generation
    }

    async fn supervise(
        self: Arc<Self>,
        generation: u64,
        mut inbound: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    ) {
        loop {
            let normal_close = match inbound.take() {
                Some(events) => self.run_session(events).await,
                None => false,
            };

            let Some(delay) = self.after_close(generation, normal_close).await else {
                return;
            };
            tokio::time::sleep(delay).await;

            if !self.is_current(generation).await {
                return;
            }

            match self.establish(generation).await {
                Ok(events) => inbound = Some(events),
                Err(ConnectionError::Superseded) => return,
                Err(e) => self.report_error(&e).await,
            }
        }
    }

    /// Pump one link until it closes; returns true for a normal close
    async fn run_session(&self, mut events: mpsc::UnboundedReceiver<TransportEvent>) -> bool {
        let period = self
            .config
            .heartbeat_interval()
            .max(std::time::Duration::from_millis(1));
        let mut heartbeat = tokio::time::interval(period);
        heartbeat.reset();

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(TransportEvent::Text(text)) => {
                        if self.frames.send(text).is_err() {
                            tracing::debug!("Inbound frame receiver dropped");
                        }
                    }
                    Some(TransportEvent::Error(message)) => {
                        self.report_error(&ConnectionError::Transport(message)).await;
                    }
                    Some(TransportEvent::Closed { normal }) => {
                        tracing::info!(normal, "Connection closed");
                        return normal;
                    }
                    None => return false,
                },
                _ = heartbeat.tick() => {
                    let probe = Outbound::Heartbeat(Heartbeat::probe(Utc::now().timestamp_millis()));
                    if let Err(e) = self.send(&probe, None).await {
                        tracing::debug!(error = %e, "Heartbeat not sent");
                    }
                }
            }
        }
    }

    /// Decide what follows a closed link; `Some(delay)` schedules a reconnect
    async fn after_close(&self, generation: u64, normal_close: bool) -> Option<std::time::Duration> {
        let mut session = self.session.lock().await;
        if session.generation != generation {
            return None;
        }
        if session.outbound.take().is_some() {
            drop(session);
            self.end_session().await;
            session = self.session.lock().await;
            if session.generation != generation {
                return None;
            }
        }

        if session.manual_disconnect || normal_close {
            drop(session);
            self.set_state(ConnectionState::Disconnected);
            return None;
        }

        if session.reconnect_attempts < self.config.max_reconnect_attempts {
            session.reconnect_attempts += 1;
            let attempt = session.reconnect_attempts;
            drop(session);

            let delay = backoff_delay(
                self.config.reconnect_interval(),
                attempt,
                self.config.max_reconnect_delay(),
            );
            self.set_state(ConnectionState::Reconnecting);
            tracing::info!(
                attempt,
                max_attempts = self.config.max_reconnect_attempts,
                delay_ms = delay.as_millis() as u64,
                "Scheduling reconnect"
            );
            Some(delay)
        } else {
            drop(session);
            self.set_state(ConnectionState::Error);
            tracing::error!(
                attempts = self.config.max_reconnect_attempts,
                "Max reconnect attempts reached"
            );
            None
        }
    }

    async fn send(&self, message: &Outbound, request_id: Option<&str>) -> Result<(), ConnectionError> {
        if *self.state.borrow() != ConnectionState::Connected {
            return Err(ConnectionError::NotConnected);
        }

        let frame = self
            .codec
            .encode(message, request_id)
            .map_err(|e| ConnectionError::Encode(e.to_string()))?;

        let session = self.session.lock().await;
        let outbound = session
            .outbound
            .as_ref()
            .ok_or(ConnectionError::NotConnected)?;
        outbound
            .send(frame)
            .map_err(|_| ConnectionError::SendFailed)?;

        tracing::trace!(kind = %message.kind(), "Message sent");
        Ok(())
    }
}
