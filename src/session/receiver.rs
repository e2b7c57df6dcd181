//! Receiver session: follows one contact's position stream.
//!
//! Transport events are translated into the four-callback
//! [`ReceiverListener`] contract. Inbound frames are validated strictly;
//! a malformed frame is logged and dropped without disturbing the session.
//! Each delivered update carries the bearing from the previous fix.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::join_actor;
use crate::constants::{
    CLOSE_ABNORMAL, CLOSE_NORMAL, CLOSE_POLICY_VIOLATION, CLOSE_SENDER_ENDED,
};
use crate::error::SessionError;
use crate::location::bearing::initial_bearing;
use crate::location::{Coordinate, LocationEvent};
use crate::transport::{
    ConnectionState, Connector, ErrorInfo, SessionEndpoint, SessionTransport, TransportConfig,
    TransportEvent, TransportEvents,
};

/// Receiver session settings.
#[derive(Debug, Clone, Default)]
pub struct ReceiverConfig {
    /// Transport settings.
    pub transport: TransportConfig,
}

/// A contact's position as delivered to the consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationUpdate {
    /// Contact who sent the fix (from the wire, else the watched contact).
    pub username: String,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Direction of travel from the previous fix, degrees in `[0, 360)`.
    ///
    /// `None` for the first fix of a session and when the position did not
    /// change.
    pub bearing: Option<f64>,
}

/// Why a receiver connection closed, from the consumer's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// The sender ended its transmission. Terminal.
    SenderEnded,
    /// The server rejected the credential or request. Terminal.
    Rejected,
    /// Normal closure.
    Normal,
    /// The connection was lost; it is retried automatically.
    Dropped,
    /// The connection was lost and the reconnection budget is spent.
    /// Terminal.
    Exhausted,
}

/// Close code, reason and its interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseStatus {
    /// WebSocket close code.
    pub code: u16,
    /// Close reason.
    pub reason: String,
    /// Interpretation of `code`.
    pub kind: CloseKind,
}

impl CloseStatus {
    /// Interpret a close code; `will_retry` tells a lost connection that is
    /// being retried from one the transport gave up on.
    #[must_use]
    pub fn new(code: u16, reason: impl Into<String>, will_retry: bool) -> Self {
        let kind = match code {
            CLOSE_SENDER_ENDED => CloseKind::SenderEnded,
            CLOSE_POLICY_VIOLATION => CloseKind::Rejected,
            CLOSE_NORMAL => CloseKind::Normal,
            _ if will_retry => CloseKind::Dropped,
            _ => CloseKind::Exhausted,
        };
        Self {
            code,
            reason: reason.into(),
            kind,
        }
    }

    /// Whether no reconnect follows this close.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.kind != CloseKind::Dropped
    }
}

/// Consumer of a receiver session.
///
/// Called from the session's actor task, one call at a time, never after
/// [`ReceiverSession::stop`] has returned.
pub trait ReceiverListener: Send + 'static {
    /// The stream is connected (again).
    fn on_success_connection(&mut self);

    /// A transport failure; a close always follows.
    fn on_error_connection(&mut self, error: &ErrorInfo);

    /// The connection closed.
    fn on_close_connection(&mut self, status: &CloseStatus);

    /// A location update arrived.
    fn on_message(&mut self, update: LocationUpdate);
}

/// Receiver callbacks as a value.
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiverEvent {
    /// See [`ReceiverListener::on_success_connection`].
    Connected,
    /// See [`ReceiverListener::on_error_connection`].
    Error(ErrorInfo),
    /// See [`ReceiverListener::on_close_connection`].
    Closed(CloseStatus),
    /// See [`ReceiverListener::on_message`].
    Location(LocationUpdate),
}

/// Listener that forwards every callback into a channel.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<ReceiverEvent>,
}

impl ChannelListener {
    /// Create a listener and the receiving end of its events.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ReceiverEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: ReceiverEvent) {
        let _ = self.tx.send(event);
    }
}

impl ReceiverListener for ChannelListener {
    fn on_success_connection(&mut self) {
        self.forward(ReceiverEvent::Connected);
    }

    fn on_error_connection(&mut self, error: &ErrorInfo) {
        self.forward(ReceiverEvent::Error(error.clone()));
    }

    fn on_close_connection(&mut self, status: &CloseStatus) {
        self.forward(ReceiverEvent::Closed(status.clone()));
    }

    fn on_message(&mut self, update: LocationUpdate) {
        self.forward(ReceiverEvent::Location(update));
    }
}

/// Previous position of the followed contact.
#[derive(Debug, Default)]
struct BearingTracker {
    previous: Option<Coordinate>,
}

impl BearingTracker {
    fn advance(&mut self, current: Coordinate) -> Option<f64> {
        let bearing = self
            .previous
            .and_then(|previous| initial_bearing(previous, current));
        self.previous = Some(current);
        bearing
    }
}

#[derive(Debug)]
struct ActiveReceiver {
    contact: String,
    disposal: CancellationToken,
    task: JoinHandle<()>,
    state: watch::Receiver<ConnectionState>,
}

/// Follows one contact's location stream.
pub struct ReceiverSession {
    config: ReceiverConfig,
    connector: Arc<dyn Connector>,
    active: Option<ActiveReceiver>,
}

impl std::fmt::Debug for ReceiverSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiverSession")
            .field("contact", &self.contact())
            .finish_non_exhaustive()
    }
}

impl ReceiverSession {
    /// Create an inactive receiver session.
    #[must_use]
    pub fn new(config: ReceiverConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            active: None,
        }
    }

    /// Start following `contact`.
    ///
    /// A running session is stopped first. `listener` receives every
    /// callback until [`Self::stop`].
    pub async fn start(
        &mut self,
        contact: &str,
        credential: &str,
        listener: impl ReceiverListener,
    ) -> Result<(), SessionError> {
        if self.active.is_some() {
            self.stop().await;
        }

        let endpoint = SessionEndpoint::receiver(contact, credential);
        let (mut transport, events) =
            SessionTransport::new(self.config.transport.clone(), Arc::clone(&self.connector));
        transport.open(endpoint).await?;

        let disposal = transport.disposal_token();
        let state = transport.subscribe_state();
        let actor = ReceiverActor {
            contact: contact.to_string(),
            transport,
            events,
            listener: Box::new(listener),
            bearing: BearingTracker::default(),
            disposal: disposal.clone(),
        };
        let task = tokio::spawn(actor.run());

        log::info!("[Receiver] Following {}", contact);
        self.active = Some(ActiveReceiver {
            contact: contact.to_string(),
            disposal,
            task,
            state,
        });
        Ok(())
    }

    /// Stop following. Idempotent; no callback fires after this returns.
    pub async fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.disposal.cancel();
        join_actor(active.task, "Receiver").await;
        log::info!("[Receiver] Stopped following {}", active.contact);
    }

    /// Whether a session is running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Contact currently followed.
    #[must_use]
    pub fn contact(&self) -> Option<&str> {
        self.active.as_ref().map(|active| active.contact.as_str())
    }

    /// Watch the transport state of the running session.
    #[must_use]
    pub fn subscribe_state(&self) -> Option<watch::Receiver<ConnectionState>> {
        self.active.as_ref().map(|active| active.state.clone())
    }
}

impl Drop for ReceiverSession {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            active.disposal.cancel();
        }
    }
}

struct ReceiverActor {
    contact: String,
    transport: SessionTransport,
    events: TransportEvents,
    listener: Box<dyn ReceiverListener>,
    bearing: BearingTracker,
    disposal: CancellationToken,
}

impl ReceiverActor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                () = self.disposal.cancelled() => break,

                event = self.events.recv() => match event {
                    Some(event) => self.dispatch(event),
                    None => break,
                },
            }
        }
        self.transport.close(None, None);
        self.transport.shutdown().await;
    }

    fn dispatch(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open => {
                log::info!("[Receiver] Connected to {}", self.contact);
                self.listener.on_success_connection();
            }
            TransportEvent::Error(info) => {
                log::warn!("[Receiver] Connection error: {}", info);
                self.listener.on_error_connection(&info);
            }
            TransportEvent::Close {
                code,
                reason,
                will_retry,
            } => {
                let status = CloseStatus::new(code, reason, will_retry);
                match status.kind {
                    CloseKind::SenderEnded => {
                        log::info!("[Receiver] {} stopped sharing", self.contact);
                    }
                    CloseKind::Rejected => {
                        log::warn!("[Receiver] Rejected: {}", status.reason);
                    }
                    CloseKind::Normal => log::info!("[Receiver] Connection closed"),
                    CloseKind::Dropped if status.code == CLOSE_ABNORMAL => {
                        log::info!("[Receiver] Connection lost");
                    }
                    CloseKind::Dropped => {
                        log::info!("[Receiver] Connection closed: {}", status.code);
                    }
                    CloseKind::Exhausted => {
                        log::warn!("[Receiver] Giving up on {}: {}", self.contact, status.reason);
                    }
                }
                self.listener.on_close_connection(&status);
            }
            TransportEvent::Message(text) => self.on_frame(&text),
        }
    }

    fn on_frame(&mut self, text: &str) {
        let event = match LocationEvent::parse(text) {
            Ok(event) => event,
            Err(e) => {
                log::warn!("[Receiver] Dropping frame: {}", e);
                return;
            }
        };

        let bearing = self.bearing.advance(event.coordinate());
        let update = LocationUpdate {
            username: event.username.unwrap_or_else(|| self.contact.clone()),
            latitude: event.latitude,
            longitude: event.longitude,
            timestamp: event.timestamp,
            bearing,
        };
        self.listener.on_message(update);
    }
}
