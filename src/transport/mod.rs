//! Session transport: one streaming connection per session endpoint.
//!
//! A [`SessionTransport`] owns at most one background driver task at a
//! time. The driver performs the handshake, pumps frames, and applies the
//! [`reconnect`] policy; the owning session observes it only through
//! [`TransportEvent`]s and the [`ConnectionState`] watch.
//!
//! # Architecture
//!
//! ```text
//!   SenderSession / ReceiverSession
//!         │  open / send / close / shutdown
//!         ▼
//!   SessionTransport ──── TransportEvents (Open, Message, Error, Close)
//!         │  spawn, cancel
//!         ▼
//!   driver task  ── Connector ──► network
//!   (connect, pump, reconnect)
//! ```
//!
//! # Lifecycle
//!
//! `Idle → Connecting → Open → (Closing →) Closed`, with `Closed` re-entering
//! `Connecting` while the reconnection policy allows. Frames are never
//! queued across connections: a `send` while not `Open` is dropped.
//!
//! # Cancellation
//!
//! Every driver runs under a child of the transport's root
//! [`CancellationToken`]. [`SessionTransport::close`] cancels the child;
//! disposal cancels the root, which permanently disables reconnection
//! before any resource is released.

// Rust guideline compliant 2026-02

pub mod connector;
mod driver;
pub mod reconnect;
#[cfg(test)]
pub(crate) mod testing;

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::constants::{CLOSE_NORMAL, DEFAULT_WS_URL, DRIVER_SHUTDOWN_TIMEOUT};
use crate::error::TransportError;
use crate::ws::{http_to_ws_scheme, redact_query};

pub use connector::{Connector, FrameReader, FrameWriter, Link, WsConnector};
pub use reconnect::{
    CloseDisposition, ReconnectConfig, ReconnectContext, ReconnectDecision, StopReason,
};

/// Default handshake timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Direction of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Publishes the device's own position.
    Sender,
    /// Subscribes to a contact's position.
    Receiver,
}

/// Identity and direction of one connection.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionEndpoint {
    /// Stream direction.
    pub role: Role,
    /// Own username for a sender, contact username for a receiver.
    pub target_identity: String,
    /// Opaque bearer credential, sent as the `jwt` query parameter.
    pub credential: String,
}

impl fmt::Debug for SessionEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionEndpoint")
            .field("role", &self.role)
            .field("target_identity", &self.target_identity)
            .field("credential", &"<redacted>")
            .finish()
    }
}

impl SessionEndpoint {
    /// Endpoint for publishing the own position.
    #[must_use]
    pub fn sender(identity: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            role: Role::Sender,
            target_identity: identity.into(),
            credential: credential.into(),
        }
    }

    /// Endpoint for watching `contact`.
    #[must_use]
    pub fn receiver(contact: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            role: Role::Receiver,
            target_identity: contact.into(),
            credential: credential.into(),
        }
    }

    /// Route below the base URL: `/send` or `/receive/{identity}`.
    #[must_use]
    pub fn route(&self) -> String {
        match self.role {
            Role::Sender => "/send".to_string(),
            Role::Receiver => format!("/receive/{}", urlencoding::encode(&self.target_identity)),
        }
    }

    /// Full endpoint URL under `base_url`.
    ///
    /// HTTP(S) bases are converted to WS(S). The credential is
    /// percent-encoded into the `jwt` query parameter.
    pub fn url(&self, base_url: &str) -> Result<String, TransportError> {
        let base = http_to_ws_scheme(base_url.trim().trim_end_matches('/'));
        if !(base.starts_with("ws://") || base.starts_with("wss://")) {
            return Err(TransportError::InvalidUrl(format!(
                "unsupported scheme in {base}"
            )));
        }
        if self.credential.is_empty() {
            return Err(TransportError::InvalidUrl("missing credential".to_string()));
        }
        if self.target_identity.trim().is_empty() {
            let missing = match self.role {
                Role::Sender => "missing sender identity",
                Role::Receiver => "missing contact identity",
            };
            return Err(TransportError::InvalidUrl(missing.to_string()));
        }
        Ok(format!(
            "{base}{}?jwt={}",
            self.route(),
            urlencoding::encode(&self.credential)
        ))
    }
}

/// Connection state of a transport.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Never opened.
    #[default]
    Idle,
    /// Handshake in progress.
    Connecting,
    /// Frames can be sent.
    Open,
    /// A local close is in progress.
    Closing,
    /// The last connection ended with `code`.
    Closed {
        /// Close code (local or remote).
        code: u16,
        /// Close reason.
        reason: String,
    },
}

impl ConnectionState {
    /// Whether frames can be sent.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

/// Description of a transport-level failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Human-readable cause chain.
    pub message: String,
}

impl ErrorInfo {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Lifecycle and data events raised by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The handshake completed.
    Open,
    /// A text frame arrived (binary frames are decoded lossily).
    Message(String),
    /// A transport failure. Always followed by a `Close`.
    Error(ErrorInfo),
    /// The connection ended. Exactly one per connection attempt.
    Close {
        /// Close code; 1006 when no close frame was received.
        code: u16,
        /// Close reason.
        reason: String,
        /// Whether the reconnection policy scheduled another attempt.
        will_retry: bool,
    },
}

/// Receiver of every event of a transport, across reconnects.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// Result of a [`SessionTransport::send`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Queued for the open connection.
    ///
    /// A frame still queued when that connection ends is discarded and
    /// counted by [`SessionTransport::discarded_frames`].
    Sent,
    /// The transport was not open; the frame was discarded.
    Dropped,
}

/// Transport settings.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Base WebSocket URL, e.g. `wss://example.com/ws`.
    pub base_url: String,
    /// Reconnection budget and delay.
    pub reconnect: ReconnectConfig,
    /// Handshake timeout; a timeout counts as a retryable error.
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_WS_URL.to_string(),
            reconnect: ReconnectConfig::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Outgoing request to a driver.
#[derive(Debug)]
pub(crate) enum Outgoing {
    /// Text frame.
    Text(String),
    /// Close with the given code and reason.
    Close {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// The live driver of a transport.
#[derive(Debug)]
struct DriverHandle {
    token: CancellationToken,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    task: JoinHandle<()>,
}

/// One logical streaming connection with automatic reconnection.
pub struct SessionTransport {
    config: TransportConfig,
    connector: Arc<dyn Connector>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    state: Arc<watch::Sender<ConnectionState>>,
    attempts: Arc<AtomicU32>,
    discarded: Arc<AtomicU64>,
    root: CancellationToken,
    driver: Option<DriverHandle>,
}

impl fmt::Debug for SessionTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTransport")
            .field("base_url", &self.config.base_url)
            .field("state", &*self.state.borrow())
            .field("attempts", &self.attempts.load(Ordering::SeqCst))
            .field("disposed", &self.root.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl SessionTransport {
    /// Create an idle transport and the receiver of its events.
    #[must_use]
    pub fn new(config: TransportConfig, connector: Arc<dyn Connector>) -> (Self, TransportEvents) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Idle);
        (
            Self {
                config,
                connector,
                events_tx,
                state: Arc::new(state),
                attempts: Arc::new(AtomicU32::new(0)),
                discarded: Arc::new(AtomicU64::new(0)),
                root: CancellationToken::new(),
                driver: None,
            },
            events_rx,
        )
    }

    /// Start connecting to `endpoint`.
    ///
    /// Any previous connection of this transport is fully closed first;
    /// its pending reconnect, if any, is cancelled. Returns as soon as the
    /// new driver is spawned; completion is signalled by
    /// [`TransportEvent::Open`].
    pub async fn open(&mut self, endpoint: SessionEndpoint) -> Result<(), TransportError> {
        if self.root.is_cancelled() {
            return Err(TransportError::Disposed);
        }
        let url = endpoint.url(&self.config.base_url)?;

        self.stop_driver().await;
        if self.root.is_cancelled() {
            return Err(TransportError::Disposed);
        }

        log::info!(
            "[Transport] Opening {:?} stream at {}",
            endpoint.role,
            redact_query(&url)
        );

        let token = self.root.child_token();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        self.attempts.store(0, Ordering::SeqCst);
        self.state.send_replace(ConnectionState::Connecting);

        let driver = driver::Driver {
            url,
            connector: Arc::clone(&self.connector),
            policy: ReconnectContext::new(self.config.reconnect),
            connect_timeout: self.config.connect_timeout,
            token: token.clone(),
            outgoing: outgoing_rx,
            close_request: None,
            events: self.events_tx.clone(),
            state: Arc::clone(&self.state),
            attempts: Arc::clone(&self.attempts),
            discarded: Arc::clone(&self.discarded),
        };
        let task = tokio::spawn(driver.run());

        self.driver = Some(DriverHandle {
            token,
            outgoing: outgoing_tx,
            task,
        });
        Ok(())
    }

    /// Send a text frame.
    ///
    /// Never queues: if the transport is not `Open` the frame is dropped
    /// and logged. Fails only when called before any [`Self::open`].
    pub fn send(&self, text: impl Into<String>) -> Result<SendOutcome, TransportError> {
        if self.root.is_cancelled() {
            log::debug!("[Transport] Disposed, dropping frame");
            return Ok(SendOutcome::Dropped);
        }
        let Some(driver) = &self.driver else {
            return Err(TransportError::NotStarted);
        };
        if driver.token.is_cancelled() || !self.state.borrow().is_open() {
            log::debug!(
                "[Transport] Not open ({:?}), dropping frame",
                *self.state.borrow()
            );
            return Ok(SendOutcome::Dropped);
        }
        match driver.outgoing.send(Outgoing::Text(text.into())) {
            Ok(()) => Ok(SendOutcome::Sent),
            Err(_) => {
                log::debug!("[Transport] Driver gone, dropping frame");
                Ok(SendOutcome::Dropped)
            }
        }
    }

    /// Close the current connection. Explicit closes are never retried.
    ///
    /// Synchronous: reconnection is disabled for the current driver before
    /// this returns. A later [`Self::open`] starts a fresh connection.
    pub fn close(&mut self, code: Option<u16>, reason: Option<&str>) {
        let Some(driver) = &self.driver else {
            return;
        };
        if driver.token.is_cancelled() {
            return;
        }
        let _ = driver.outgoing.send(Outgoing::Close {
            code: code.unwrap_or(CLOSE_NORMAL),
            reason: reason.unwrap_or("client requested close").to_string(),
        });
        driver.token.cancel();
        self.state.send_if_modified(|state| {
            if state.is_open() {
                *state = ConnectionState::Closing;
                true
            } else {
                false
            }
        });
    }

    /// Dispose of the transport: reconnection is disabled permanently,
    /// any pending reconnect is cancelled, and the driver is awaited.
    pub async fn shutdown(&mut self) {
        self.root.cancel();
        self.stop_driver().await;
    }

    /// Token that disposes this transport when cancelled.
    ///
    /// Lets an owner flip reconnection off synchronously from a context
    /// that cannot await [`Self::shutdown`], such as `Drop`.
    #[must_use]
    pub fn disposal_token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Watch connection state transitions.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Reconnect attempts made since the last `Open`.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Frames reported [`SendOutcome::Sent`] that were never written
    /// because their connection ended first.
    #[must_use]
    pub fn discarded_frames(&self) -> u64 {
        self.discarded.load(Ordering::SeqCst)
    }

    /// Shared handle to the [`Self::discarded_frames`] counter.
    pub(crate) fn discard_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.discarded)
    }

    /// Whether the transport has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Close the current driver (if any) and wait for it to exit.
    async fn stop_driver(&mut self) {
        self.close(None, None);
        let Some(driver) = self.driver.take() else {
            return;
        };

        let abort = driver.task.abort_handle();
        match tokio::time::timeout(DRIVER_SHUTDOWN_TIMEOUT, driver.task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::error!("[Transport] Driver task failed: {}", e),
            Err(_) => {
                log::warn!(
                    "[Transport] Driver did not exit within {:?}, aborting",
                    DRIVER_SHUTDOWN_TIMEOUT
                );
                abort.abort();
                self.state.send_replace(ConnectionState::Closed {
                    code: CLOSE_NORMAL,
                    reason: "client requested close".to_string(),
                });
            }
        }
    }
}

impl Drop for SessionTransport {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::testing::{ClientFrame, Script, ScriptedConnector};
    use super::*;
    use crate::constants::{CLOSE_ABNORMAL, CLOSE_POLICY_VIOLATION, CLOSE_SENDER_ENDED};
    use crate::ws::WsMessage;

    const DELAY: Duration = Duration::from_secs(3);

    fn config() -> TransportConfig {
        TransportConfig {
            base_url: "ws://relay.test/ws".to_string(),
            reconnect: ReconnectConfig {
                max_attempts: 5,
                base_delay: DELAY,
            },
            connect_timeout: Duration::from_secs(10),
        }
    }

    fn endpoint() -> SessionEndpoint {
        SessionEndpoint::sender("me", "token-1")
    }

    async fn next_event(events: &mut TransportEvents) -> TransportEvent {
        tokio::time::timeout(Duration::from_secs(120), events.recv())
            .await
            .expect("timed out waiting for transport event")
            .expect("event channel closed")
    }

    async fn next_close(events: &mut TransportEvents) -> (u16, String) {
        loop {
            if let TransportEvent::Close { code, reason, .. } = next_event(events).await {
                return (code, reason);
            }
        }
    }

    #[test]
    fn test_sender_url() {
        let url = SessionEndpoint::sender("me", "abc.def-ghi")
            .url("ws://10.0.2.2:8000/ws")
            .unwrap();
        assert_eq!(url, "ws://10.0.2.2:8000/ws/send?jwt=abc.def-ghi");
    }

    #[test]
    fn test_receiver_url_encodes_identity_and_token() {
        let url = SessionEndpoint::receiver("anna maria", "a+b/c=")
            .url("https://example.com/ws/")
            .unwrap();
        assert_eq!(
            url,
            "wss://example.com/ws/receive/anna%20maria?jwt=a%2Bb%2Fc%3D"
        );
    }

    #[test]
    fn test_url_rejects_bad_input() {
        assert!(endpoint().url("ftp://example.com").is_err());
        assert!(SessionEndpoint::sender("me", "").url("ws://x").is_err());
        assert!(SessionEndpoint::receiver("", "t").url("ws://x").is_err());
        assert!(SessionEndpoint::sender(" ", "t").url("ws://x").is_err());
    }

    #[test]
    fn test_endpoint_debug_redacts_credential() {
        let printed = format!("{:?}", SessionEndpoint::sender("me", "secret-token"));
        assert!(!printed.contains("secret-token"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_before_open_is_misuse() {
        let (connector, _remotes) = ScriptedConnector::new(vec![], Script::Accept);
        let (transport, _events) = SessionTransport::new(config(), connector);
        assert_eq!(transport.send("x"), Err(TransportError::NotStarted));
        assert_eq!(transport.state(), ConnectionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_then_send_reaches_remote() {
        let (connector, mut remotes) = ScriptedConnector::new(vec![], Script::Accept);
        let (mut transport, mut events) = SessionTransport::new(config(), connector.clone());

        transport.open(endpoint()).await.unwrap();
        assert_eq!(next_event(&mut events).await, TransportEvent::Open);
        assert_eq!(transport.state(), ConnectionState::Open);
        assert_eq!(
            connector.urls(),
            vec!["ws://relay.test/ws/send?jwt=token-1".to_string()]
        );

        let mut remote = remotes.recv().await.unwrap();
        assert_eq!(transport.send("hello"), Ok(SendOutcome::Sent));
        assert_eq!(
            remote.outbound.recv().await,
            Some(ClientFrame::Text("hello".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_text_becomes_message_event() {
        let (connector, mut remotes) = ScriptedConnector::new(vec![], Script::Accept);
        let (mut transport, mut events) = SessionTransport::new(config(), connector);
        transport.open(endpoint()).await.unwrap();
        assert_eq!(next_event(&mut events).await, TransportEvent::Open);

        let remote = remotes.recv().await.unwrap();
        remote.push(WsMessage::Text("{}".to_string()));
        remote.push(WsMessage::Binary(b"raw".to_vec()));
        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Message("{}".to_string())
        );
        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Message("raw".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_while_connecting_is_dropped() {
        let (connector, mut remotes) = ScriptedConnector::new(vec![Script::Hang], Script::Accept);
        let (mut transport, _events) = SessionTransport::new(config(), connector);
        transport.open(endpoint()).await.unwrap();
        tokio::task::yield_now().await;

        assert_eq!(transport.state(), ConnectionState::Connecting);
        assert_eq!(transport.send("early"), Ok(SendOutcome::Dropped));
        assert!(remotes.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sender_ended_close_is_terminal() {
        let (connector, mut remotes) = ScriptedConnector::new(vec![], Script::Accept);
        let (mut transport, mut events) = SessionTransport::new(config(), connector.clone());
        transport.open(endpoint()).await.unwrap();
        assert_eq!(next_event(&mut events).await, TransportEvent::Open);

        let remote = remotes.recv().await.unwrap();
        remote.push(WsMessage::Close {
            code: CLOSE_SENDER_ENDED,
            reason: "done".to_string(),
        });
        assert_eq!(next_close(&mut events).await.0, CLOSE_SENDER_ENDED);

        tokio::time::sleep(DELAY * 10).await;
        assert_eq!(connector.connect_count(), 1);
        assert!(events.try_recv().is_err());
        assert_eq!(
            transport.state(),
            ConnectionState::Closed {
                code: CLOSE_SENDER_ENDED,
                reason: "done".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_policy_violation_close_is_terminal() {
        let (connector, mut remotes) = ScriptedConnector::new(vec![], Script::Accept);
        let (mut transport, mut events) = SessionTransport::new(config(), connector.clone());
        transport.open(endpoint()).await.unwrap();
        assert_eq!(next_event(&mut events).await, TransportEvent::Open);

        remotes.recv().await.unwrap().push(WsMessage::Close {
            code: CLOSE_POLICY_VIOLATION,
            reason: "expired token".to_string(),
        });
        assert_eq!(next_close(&mut events).await.0, CLOSE_POLICY_VIOLATION);

        tokio::time::sleep(DELAY * 10).await;
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_normal_close_is_not_retried() {
        let (connector, mut remotes) = ScriptedConnector::new(vec![], Script::Accept);
        let (mut transport, mut events) = SessionTransport::new(config(), connector.clone());
        transport.open(endpoint()).await.unwrap();
        assert_eq!(next_event(&mut events).await, TransportEvent::Open);

        remotes.recv().await.unwrap().push(WsMessage::Close {
            code: CLOSE_NORMAL,
            reason: String::new(),
        });
        assert_eq!(next_close(&mut events).await.0, CLOSE_NORMAL);
        tokio::time::sleep(DELAY * 10).await;
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_failures_make_exactly_six_attempts() {
        let (connector, _remotes) = ScriptedConnector::new(vec![], Script::refuse("refused"));
        let (mut transport, mut events) = SessionTransport::new(config(), connector.clone());
        transport.open(endpoint()).await.unwrap();

        for _ in 0..6 {
            assert!(matches!(
                next_event(&mut events).await,
                TransportEvent::Error(_)
            ));
            assert_eq!(next_close(&mut events).await.0, CLOSE_ABNORMAL);
        }

        tokio::time::sleep(DELAY * 20).await;
        assert_eq!(connector.connect_count(), 6);
        assert!(events.try_recv().is_err());

        let times = connector.attempt_times();
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= DELAY);
        }
        assert_eq!(transport.reconnect_attempts(), 5);
        assert!(matches!(
            transport.state(),
            ConnectionState::Closed {
                code: CLOSE_ABNORMAL,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_the_exhausting_close_reports_no_retry() {
        let (connector, _remotes) = ScriptedConnector::new(vec![], Script::refuse("refused"));
        let mut config = config();
        config.reconnect.max_attempts = 1;
        let (mut transport, mut events) = SessionTransport::new(config, connector.clone());
        transport.open(endpoint()).await.unwrap();

        let mut retries = Vec::new();
        while retries.len() < 2 {
            if let TransportEvent::Close { will_retry, .. } = next_event(&mut events).await {
                retries.push(will_retry);
            }
        }
        assert_eq!(retries, vec![true, false]);
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_queued_behind_remote_close_is_counted_as_discarded() {
        let (connector, mut remotes) = ScriptedConnector::new(vec![], Script::Accept);
        let (mut transport, mut events) = SessionTransport::new(config(), connector);
        transport.open(endpoint()).await.unwrap();
        assert_eq!(next_event(&mut events).await, TransportEvent::Open);

        let mut remote = remotes.recv().await.unwrap();
        remote.push(WsMessage::Close {
            code: 1011,
            reason: "server restart".to_string(),
        });
        // The driver has not seen the close yet, so the frame is accepted
        assert_eq!(transport.send("lost"), Ok(SendOutcome::Sent));

        match next_event(&mut events).await {
            TransportEvent::Close {
                code, will_retry, ..
            } => {
                assert_eq!(code, 1011);
                assert!(will_retry);
            }
            other => panic!("expected close, got {other:?}"),
        }
        assert_eq!(transport.discarded_frames(), 1);
        assert!(remote.drain_texts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_reconnects_after_delay_and_resets_attempts() {
        let (connector, mut remotes) = ScriptedConnector::new(vec![], Script::Accept);
        let (mut transport, mut events) = SessionTransport::new(config(), connector.clone());
        transport.open(endpoint()).await.unwrap();
        assert_eq!(next_event(&mut events).await, TransportEvent::Open);

        let mut remote = remotes.recv().await.unwrap();
        for ts in [0, 1000, 2000] {
            let frame = format!(r#"{{"latitude":1,"longitude":2,"timestamp":{ts}}}"#);
            assert_eq!(transport.send(frame.clone()), Ok(SendOutcome::Sent));
            assert_eq!(remote.outbound.recv().await, Some(ClientFrame::Text(frame)));
        }

        remote.hang_up();
        let dropped_at = tokio::time::Instant::now();
        assert_eq!(next_close(&mut events).await.0, CLOSE_ABNORMAL);
        assert_eq!(transport.reconnect_attempts(), 1);

        assert_eq!(next_event(&mut events).await, TransportEvent::Open);
        assert!(dropped_at.elapsed() >= DELAY);
        assert_eq!(transport.reconnect_attempts(), 0);
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_are_not_replayed_after_reconnect() {
        let (connector, mut remotes) = ScriptedConnector::new(vec![], Script::Accept);
        let (mut transport, mut events) = SessionTransport::new(config(), connector);
        transport.open(endpoint()).await.unwrap();
        assert_eq!(next_event(&mut events).await, TransportEvent::Open);

        let remote = remotes.recv().await.unwrap();
        remote.hang_up();
        next_close(&mut events).await;
        assert_eq!(transport.send("stale"), Ok(SendOutcome::Dropped));

        assert_eq!(next_event(&mut events).await, TransportEvent::Open);
        let mut second = remotes.recv().await.unwrap();
        assert_eq!(transport.send("fresh"), Ok(SendOutcome::Sent));
        assert_eq!(
            second.outbound.recv().await,
            Some(ClientFrame::Text("fresh".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_pending_reconnect() {
        let (connector, _remotes) = ScriptedConnector::new(vec![], Script::refuse("down"));
        let (mut transport, mut events) = SessionTransport::new(config(), connector.clone());
        transport.open(endpoint()).await.unwrap();
        next_close(&mut events).await;

        transport.close(None, None);
        tokio::time::sleep(DELAY * 10).await;
        assert_eq!(connector.connect_count(), 1);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_close_sends_frame_and_single_close_event() {
        let (connector, mut remotes) = ScriptedConnector::new(vec![], Script::Accept);
        let (mut transport, mut events) = SessionTransport::new(config(), connector.clone());
        transport.open(endpoint()).await.unwrap();
        assert_eq!(next_event(&mut events).await, TransportEvent::Open);
        let mut remote = remotes.recv().await.unwrap();

        transport.close(Some(CLOSE_SENDER_ENDED), Some("stopped sharing"));
        assert_eq!(transport.send("late"), Ok(SendOutcome::Dropped));
        assert_eq!(
            remote.outbound.recv().await,
            Some(ClientFrame::Close {
                code: CLOSE_SENDER_ENDED,
                reason: "stopped sharing".to_string()
            })
        );
        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Close {
                code: CLOSE_SENDER_ENDED,
                reason: "stopped sharing".to_string(),
                will_retry: false,
            }
        );

        tokio::time::sleep(DELAY * 10).await;
        assert_eq!(connector.connect_count(), 1);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reopen_closes_previous_connection_first() {
        let (connector, mut remotes) = ScriptedConnector::new(vec![], Script::Accept);
        let (mut transport, mut events) = SessionTransport::new(config(), connector.clone());
        transport.open(endpoint()).await.unwrap();
        assert_eq!(next_event(&mut events).await, TransportEvent::Open);
        let mut first = remotes.recv().await.unwrap();

        transport
            .open(SessionEndpoint::sender("me", "token-2"))
            .await
            .unwrap();

        // The first link saw its close frame and ended before the second open
        assert!(matches!(
            first.outbound.recv().await,
            Some(ClientFrame::Close { code: CLOSE_NORMAL, .. })
        ));
        assert_eq!(first.outbound.recv().await, None);
        assert_eq!(next_close(&mut events).await.0, CLOSE_NORMAL);
        assert_eq!(next_event(&mut events).await, TransportEvent::Open);
        assert_eq!(connector.connect_count(), 2);
        assert!(connector.urls()[1].ends_with("jwt=token-2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_is_permanent() {
        let (connector, _remotes) = ScriptedConnector::new(vec![], Script::Accept);
        let (mut transport, mut events) = SessionTransport::new(config(), connector.clone());
        transport.open(endpoint()).await.unwrap();
        assert_eq!(next_event(&mut events).await, TransportEvent::Open);

        transport.shutdown().await;
        assert!(transport.is_disposed());
        assert_eq!(next_close(&mut events).await.0, CLOSE_NORMAL);
        assert_eq!(
            transport.open(endpoint()).await,
            Err(TransportError::Disposed)
        );
        assert_eq!(transport.send("x"), Ok(SendOutcome::Dropped));

        tokio::time::sleep(DELAY * 10).await;
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disposal_token_stops_waiting_reconnect() {
        let (connector, _remotes) = ScriptedConnector::new(vec![], Script::refuse("down"));
        let (mut transport, mut events) = SessionTransport::new(config(), connector.clone());
        transport.open(endpoint()).await.unwrap();
        next_close(&mut events).await;

        transport.disposal_token().cancel();
        tokio::time::sleep(DELAY * 10).await;
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_is_retryable_error() {
        let (connector, _remotes) =
            ScriptedConnector::new(vec![Script::Hang], Script::Accept);
        let (mut transport, mut events) = SessionTransport::new(config(), connector.clone());
        transport.open(endpoint()).await.unwrap();

        match next_event(&mut events).await {
            TransportEvent::Error(info) => assert!(info.message.contains("timed out")),
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(next_close(&mut events).await.0, CLOSE_ABNORMAL);
        assert_eq!(next_event(&mut events).await, TransportEvent::Open);
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_watch_reports_transitions() {
        let (connector, _remotes) = ScriptedConnector::new(vec![], Script::Accept);
        let (mut transport, mut events) = SessionTransport::new(config(), connector);
        let mut state = transport.subscribe_state();
        transport.open(endpoint()).await.unwrap();
        assert_eq!(next_event(&mut events).await, TransportEvent::Open);
        state
            .wait_for(ConnectionState::is_open)
            .await
            .expect("state sender alive");
    }
}
