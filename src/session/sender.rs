//! Sender session: publishes the device's position.
//!
//! ```text
//!   GeolocationSource ──fix──► actor ──send──► SessionTransport ──► relay
//!                               ▲                     │
//!                               └──── TransportEvent ─┘
//! ```
//!
//! The watch starts on the first `Open` and stays up across reconnects.
//! Fixes that arrive while the transport is not open are dropped, never
//! queued: the reconnection policy restores the channel, not the data.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::foreground::{ExecutionLease, ForegroundService};
use super::join_actor;
use crate::error::{GeolocationError, SessionError};
use crate::geolocation::{GeolocationSource, Watch, WatchOptions};
use crate::location::{LocationEvent, LocationFix};
use crate::transport::{
    ConnectionState, Connector, SendOutcome, SessionEndpoint, SessionTransport, TransportConfig,
    TransportEvent, TransportEvents,
};

/// Sender session settings.
#[derive(Debug, Clone, Default)]
pub struct SenderConfig {
    /// Transport settings.
    pub transport: TransportConfig,
    /// Geolocation watch policy.
    pub watch: WatchOptions,
}

/// Fix counters of the current (or last) sender session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SenderStats {
    /// Fixes written to an open connection.
    pub sent: u64,
    /// Fixes discarded because the transport was not open, including
    /// fixes accepted just before their connection ended.
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    dropped: AtomicU64,
    /// Shared with the transport; accepted fixes lost with their connection.
    discarded: Arc<AtomicU64>,
}

impl Counters {
    fn snapshot(&self) -> SenderStats {
        let discarded = self.discarded.load(Ordering::SeqCst);
        SenderStats {
            sent: self.accepted.load(Ordering::Relaxed).saturating_sub(discarded),
            dropped: self.dropped.load(Ordering::Relaxed) + discarded,
        }
    }
}

#[derive(Debug)]
struct ActiveSender {
    disposal: CancellationToken,
    task: JoinHandle<()>,
    state: watch::Receiver<ConnectionState>,
    lease: ExecutionLease,
}

/// Streams the device's own position while active.
pub struct SenderSession {
    config: SenderConfig,
    geolocation: Arc<dyn GeolocationSource>,
    foreground: Arc<dyn ForegroundService>,
    connector: Arc<dyn Connector>,
    counters: Arc<Counters>,
    active: Option<ActiveSender>,
}

impl std::fmt::Debug for SenderSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SenderSession")
            .field("active", &self.is_active())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl SenderSession {
    /// Create an inactive sender session.
    #[must_use]
    pub fn new(
        config: SenderConfig,
        geolocation: Arc<dyn GeolocationSource>,
        foreground: Arc<dyn ForegroundService>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            config,
            geolocation,
            foreground,
            connector,
            counters: Arc::new(Counters::default()),
            active: None,
        }
    }

    /// Start sharing as `username` with `credential`.
    ///
    /// A running session is stopped first. Fails with
    /// [`SessionError::PermissionDenied`] if location authorization is
    /// refused; nothing is acquired in that case and a later `start` is
    /// required once permission is granted.
    pub async fn start(&mut self, username: &str, credential: &str) -> Result<(), SessionError> {
        if self.active.is_some() {
            log::info!("[Sender] Restarting: stopping previous session first");
            self.stop().await;
        }

        match self.geolocation.request_authorization().await {
            Ok(()) => {}
            Err(GeolocationError::Denied) => {
                log::warn!("[Sender] Location permission denied");
                return Err(SessionError::PermissionDenied);
            }
            Err(e) => return Err(e.into()),
        }

        let endpoint = SessionEndpoint::sender(username, credential);
        endpoint.url(&self.config.transport.base_url)?;

        let lease = ExecutionLease::acquire(Arc::clone(&self.foreground))
            .map_err(|e| SessionError::Lease(format!("{e:#}")))?;

        let (mut transport, events) =
            SessionTransport::new(self.config.transport.clone(), Arc::clone(&self.connector));
        transport.open(endpoint).await?;

        self.counters = Arc::new(Counters {
            discarded: transport.discard_counter(),
            ..Counters::default()
        });
        let disposal = transport.disposal_token();
        let state = transport.subscribe_state();

        let actor = SenderActor {
            transport,
            events,
            geolocation: Arc::clone(&self.geolocation),
            options: self.config.watch,
            watch: None,
            watch_ended: false,
            disposal: disposal.clone(),
            counters: Arc::clone(&self.counters),
        };
        let task = tokio::spawn(actor.run());

        log::info!("[Sender] Started sharing as {}", username);
        self.active = Some(ActiveSender {
            disposal,
            task,
            state,
            lease,
        });
        Ok(())
    }

    /// Stop sharing. Idempotent.
    ///
    /// Reconnection is disabled before anything is torn down; the lease is
    /// released last.
    pub async fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.disposal.cancel();
        join_actor(active.task, "Sender").await;
        drop(active.lease);

        let stats = self.stats();
        log::info!(
            "[Sender] Stopped ({} fixes sent, {} dropped)",
            stats.sent,
            stats.dropped
        );
    }

    /// Whether a session is running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Fix counters of the current or most recent session.
    #[must_use]
    pub fn stats(&self) -> SenderStats {
        self.counters.snapshot()
    }

    /// Watch the transport state of the running session.
    #[must_use]
    pub fn subscribe_state(&self) -> Option<watch::Receiver<ConnectionState>> {
        self.active.as_ref().map(|active| active.state.clone())
    }
}

impl Drop for SenderSession {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            active.disposal.cancel();
        }
    }
}

struct SenderActor {
    transport: SessionTransport,
    events: TransportEvents,
    geolocation: Arc<dyn GeolocationSource>,
    options: WatchOptions,
    watch: Option<Watch>,
    watch_ended: bool,
    disposal: CancellationToken,
    counters: Arc<Counters>,
}

impl SenderActor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                () = self.disposal.cancelled() => break,

                event = self.events.recv() => match event {
                    Some(event) => self.on_transport_event(event),
                    None => break,
                },

                fix = next_fix(&mut self.watch) => match fix {
                    Some(Ok(fix)) => self.forward(&fix),
                    Some(Err(e)) => log::warn!("[Sender] Geolocation error: {}", e),
                    None => {
                        log::info!("[Sender] Geolocation watch ended");
                        self.watch = None;
                        self.watch_ended = true;
                    }
                },
            }
        }

        if let Some(watch) = self.watch.take() {
            self.geolocation.clear_watch(watch.id);
        }
        self.transport.close(None, None);
        self.transport.shutdown().await;
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open => {
                log::info!("[Sender] Stream open");
                if self.watch.is_none() && !self.watch_ended {
                    self.start_watch();
                }
            }
            TransportEvent::Error(info) => log::warn!("[Sender] Transport error: {}", info),
            TransportEvent::Close {
                code,
                reason,
                will_retry,
            } => {
                if will_retry {
                    log::info!("[Sender] Stream closed: {} {}, reconnecting", code, reason);
                } else {
                    log::warn!("[Sender] Stream closed: {} {}, not reconnecting", code, reason);
                }
            }
            TransportEvent::Message(text) => {
                log::debug!("[Sender] Ignoring inbound frame ({} bytes)", text.len());
            }
        }
    }

    fn start_watch(&mut self) {
        match self.geolocation.watch(self.options) {
            Ok(watch) => {
                log::info!("[Sender] Watching location (watch {})", watch.id.0);
                self.watch = Some(watch);
            }
            Err(e) => {
                log::error!("[Sender] Failed to start location watch: {}", e);
                self.watch_ended = true;
            }
        }
    }

    fn forward(&self, fix: &LocationFix) {
        let payload = match LocationEvent::from_fix(fix).to_json() {
            Ok(payload) => payload,
            Err(e) => {
                log::warn!("[Sender] Failed to encode fix: {}", e);
                return;
            }
        };

        match self.transport.send(payload) {
            Ok(SendOutcome::Sent) => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                log::debug!("[Sender] Sent fix at {}", fix.timestamp);
            }
            Ok(SendOutcome::Dropped) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                log::debug!("[Sender] Transport not open, fix at {} dropped", fix.timestamp);
            }
            Err(e) => log::warn!("[Sender] Send failed: {}", e),
        }
    }
}

/// Next item of the watch, or never when there is none.
async fn next_fix(watch: &mut Option<Watch>) -> Option<Result<LocationFix, GeolocationError>> {
    match watch {
        Some(watch) => watch.fixes.recv().await,
        None => std::future::pending().await,
    }
}
