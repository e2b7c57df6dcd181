//! Background task behind a [`super::SessionTransport`].
//!
//! One driver per `open`. It owns the socket halves and the
//! [`ReconnectContext`], and is the only writer of the shared
//! [`ConnectionState`] while it runs.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::connector::{Connector, FrameReader, FrameWriter};
use super::reconnect::{CloseDisposition, ReconnectContext, ReconnectDecision, StopReason};
use super::{ConnectionState, ErrorInfo, Outgoing, TransportEvent};
use crate::constants::{CLOSE_ABNORMAL, CLOSE_NORMAL};
use crate::ws::{redact_query, WsMessage};

/// How one connection attempt ended.
#[derive(Debug)]
enum Ended {
    /// Closed by this side (explicit close or disposal).
    Local,
    /// The remote sent a close frame.
    Remote { code: u16, reason: String },
    /// The stream ended without a close frame.
    Dropped { reason: String },
    /// Handshake, read or write failure.
    Failed { message: String },
}

fn default_close() -> (u16, String) {
    (CLOSE_NORMAL, "client requested close".to_string())
}

pub(crate) struct Driver {
    pub(crate) url: String,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) policy: ReconnectContext,
    pub(crate) connect_timeout: Duration,
    pub(crate) token: CancellationToken,
    pub(crate) outgoing: mpsc::UnboundedReceiver<Outgoing>,
    pub(crate) close_request: Option<(u16, String)>,
    pub(crate) events: mpsc::UnboundedSender<TransportEvent>,
    pub(crate) state: Arc<watch::Sender<ConnectionState>>,
    pub(crate) attempts: Arc<AtomicU32>,
    pub(crate) discarded: Arc<AtomicU64>,
}

impl Driver {
    pub(crate) async fn run(mut self) {
        let target = redact_query(&self.url);

        loop {
            self.state.send_replace(ConnectionState::Connecting);
            log::debug!("[Transport] Connecting to {}", target);

            let connected = tokio::select! {
                biased;
                () = self.token.cancelled() => None,
                result = tokio::time::timeout(
                    self.connect_timeout,
                    self.connector.connect(&self.url),
                ) => Some(result),
            };

            let ended = match connected {
                None => {
                    self.drain_pending(None).await;
                    Ended::Local
                }
                Some(Err(_)) => Ended::Failed {
                    message: format!("connect timed out after {:?}", self.connect_timeout),
                },
                Some(Ok(Err(e))) => Ended::Failed {
                    message: format!("{e:#}"),
                },
                Some(Ok(Ok((writer, reader)))) => self.pump(writer, reader, &target).await,
            };

            match self.finish(ended) {
                ReconnectDecision::Retry { attempt, delay } => {
                    log::info!(
                        "[Transport] Reconnecting to {} in {:?} (attempt {})",
                        target,
                        delay,
                        attempt
                    );
                    tokio::select! {
                        biased;
                        () = self.token.cancelled() => {
                            log::debug!("[Transport] Pending reconnect cancelled");
                            return;
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                    self.discard_stale();
                }
                ReconnectDecision::Stop(reason) => {
                    log_stop(reason, &target);
                    return;
                }
            }
        }
    }

    /// Run one open connection until it ends.
    async fn pump(
        &mut self,
        mut writer: Box<dyn FrameWriter>,
        mut reader: Box<dyn FrameReader>,
        target: &str,
    ) -> Ended {
        self.policy.on_open();
        self.attempts.store(0, Ordering::SeqCst);
        self.discard_stale();
        self.state.send_replace(ConnectionState::Open);
        log::info!("[Transport] Connected to {}", target);
        self.emit(TransportEvent::Open);

        loop {
            tokio::select! {
                biased;

                () = self.token.cancelled() => {
                    return self.close_locally(writer.as_mut()).await;
                }

                frame = reader.recv() => match frame {
                    Some(Ok(WsMessage::Text(text))) => self.emit(TransportEvent::Message(text)),
                    Some(Ok(WsMessage::Binary(data))) => {
                        let text = String::from_utf8_lossy(&data).into_owned();
                        self.emit(TransportEvent::Message(text));
                    }
                    Some(Ok(WsMessage::Close { code, reason })) => {
                        return Ended::Remote { code, reason };
                    }
                    Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {}
                    Some(Err(e)) => {
                        return Ended::Failed { message: format!("{e:#}") };
                    }
                    None => {
                        return Ended::Dropped { reason: "stream ended".to_string() };
                    }
                },

                request = self.outgoing.recv() => match request {
                    Some(Outgoing::Text(text)) => {
                        if let Err(e) = writer.send_text(&text).await {
                            self.count_discarded(1);
                            return Ended::Failed { message: format!("{e:#}") };
                        }
                    }
                    Some(Outgoing::Close { code, reason }) => {
                        self.close_request = Some((code, reason));
                        self.token.cancel();
                    }
                    None => {
                        self.token.cancel();
                    }
                },
            }
        }
    }

    /// Flush frames accepted before the close, then send the close frame.
    async fn close_locally(&mut self, writer: &mut dyn FrameWriter) -> Ended {
        self.state.send_replace(ConnectionState::Closing);
        self.drain_pending(Some(&mut *writer)).await;

        let (code, reason) = self.close_request.clone().unwrap_or_else(default_close);
        if let Err(e) = writer.send_close(code, &reason).await {
            log::debug!("[Transport] Close frame not delivered: {:#}", e);
        }
        Ended::Local
    }

    /// Drain queued requests. Text frames go to `writer` when one is given
    /// and are counted as discarded otherwise; the last close request wins.
    async fn drain_pending(&mut self, mut writer: Option<&mut dyn FrameWriter>) {
        while let Ok(request) = self.outgoing.try_recv() {
            match request {
                Outgoing::Text(text) => match writer.as_deref_mut() {
                    Some(writer) => {
                        if let Err(e) = writer.send_text(&text).await {
                            log::debug!("[Transport] Frame lost during close: {:#}", e);
                            self.count_discarded(1);
                        }
                    }
                    None => self.count_discarded(1),
                },
                Outgoing::Close { code, reason } => self.close_request = Some((code, reason)),
            }
        }
    }

    /// Discard frames queued for a connection that no longer exists.
    fn discard_stale(&mut self) {
        let mut stale = 0u64;
        while let Ok(request) = self.outgoing.try_recv() {
            match request {
                Outgoing::Text(_) => stale += 1,
                Outgoing::Close { code, reason } => self.close_request = Some((code, reason)),
            }
        }
        if stale > 0 {
            log::debug!("[Transport] Discarded {} stale frame(s)", stale);
            self.count_discarded(stale);
        }
    }

    fn count_discarded(&self, frames: u64) {
        self.discarded.fetch_add(frames, Ordering::SeqCst);
    }

    /// Record the end of a connection attempt and decide what happens next.
    ///
    /// The decision, the attempt counter and the discard count are settled
    /// before the close event is published.
    fn finish(&mut self, ended: Ended) -> ReconnectDecision {
        let (code, reason, disposition) = match ended {
            Ended::Local => {
                self.policy.disable();
                let (code, reason) = self.close_request.take().unwrap_or_else(default_close);
                (code, reason, CloseDisposition::Normal)
            }
            Ended::Remote { code, reason } => {
                log::info!("[Transport] Closed by remote: {} {}", code, reason);
                (code, reason, CloseDisposition::classify(code))
            }
            Ended::Dropped { reason } => {
                log::warn!("[Transport] Connection dropped: {}", reason);
                (CLOSE_ABNORMAL, reason, CloseDisposition::Retryable)
            }
            Ended::Failed { message } => {
                log::warn!("[Transport] Connection failed: {}", message);
                self.emit(TransportEvent::Error(ErrorInfo::new(message.clone())));
                (CLOSE_ABNORMAL, message, CloseDisposition::Retryable)
            }
        };

        if self.token.is_cancelled() {
            self.policy.disable();
        }
        let decision = self.policy.on_disconnect(disposition);
        let will_retry = matches!(decision, ReconnectDecision::Retry { .. });
        if let ReconnectDecision::Retry { attempt, .. } = decision {
            self.attempts.store(attempt, Ordering::SeqCst);
        }
        self.discard_stale();

        self.state.send_replace(ConnectionState::Closed {
            code,
            reason: reason.clone(),
        });
        self.emit(TransportEvent::Close {
            code,
            reason,
            will_retry,
        });
        decision
    }

    fn emit(&self, event: TransportEvent) {
        // Receiver gone means the owner is shutting down
        let _ = self.events.send(event);
    }
}

fn log_stop(reason: StopReason, target: &str) {
    match reason {
        StopReason::Disabled => log::debug!("[Transport] Closed locally: {}", target),
        StopReason::Terminal(CloseDisposition::SenderEnded) => {
            log::info!("[Transport] Sender ended transmission, not reconnecting");
        }
        StopReason::Terminal(CloseDisposition::PolicyViolation) => {
            log::warn!("[Transport] Rejected by server (policy violation), not reconnecting");
        }
        StopReason::Terminal(disposition) => {
            log::info!("[Transport] Closed ({:?}), not reconnecting", disposition);
        }
        StopReason::Exhausted { attempts } => {
            log::warn!(
                "[Transport] ReconnectExhausted: giving up on {} after {} attempt(s)",
                target,
                attempts
            );
        }
    }
}
