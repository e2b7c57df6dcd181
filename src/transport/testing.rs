//! Scripted in-memory [`Connector`] for transport and session tests.
//!
//! Each `connect` call consumes the next [`Script`] step (or the fallback).
//! An accepted link is handed to the test as a [`RemoteEnd`], which plays
//! the server: it pushes inbound frames and observes what the client sent.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::connector::{Connector, FrameReader, FrameWriter, Link};
use crate::ws::WsMessage;

/// Outcome of one `connect` call.
#[derive(Debug, Clone)]
pub(crate) enum Script {
    /// Handshake succeeds.
    Accept,
    /// Handshake fails with this message.
    Refuse(String),
    /// Handshake never completes.
    Hang,
}

impl Script {
    pub(crate) fn refuse(message: &str) -> Self {
        Self::Refuse(message.to_string())
    }
}

/// Frame written by the client under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ClientFrame {
    Text(String),
    Close { code: u16, reason: String },
}

/// Server side of an accepted link.
#[derive(Debug)]
pub(crate) struct RemoteEnd {
    pub(crate) inbound: mpsc::UnboundedSender<Result<WsMessage>>,
    pub(crate) outbound: mpsc::UnboundedReceiver<ClientFrame>,
}

impl RemoteEnd {
    /// Deliver a frame to the client.
    pub(crate) fn push(&self, message: WsMessage) {
        let _ = self.inbound.send(Ok(message));
    }

    /// Deliver a text frame to the client.
    pub(crate) fn push_text(&self, text: &str) {
        self.push(WsMessage::Text(text.to_string()));
    }

    /// Make the client's next read fail.
    pub(crate) fn fail(&self, message: &str) {
        let _ = self.inbound.send(Err(anyhow!("{message}")));
    }

    /// Drop the link without a close frame.
    pub(crate) fn hang_up(self) {
        drop(self);
    }

    /// Text frames received so far, without waiting.
    pub(crate) fn drain_texts(&mut self) -> Vec<String> {
        let mut texts = Vec::new();
        while let Ok(frame) = self.outbound.try_recv() {
            if let ClientFrame::Text(text) = frame {
                texts.push(text);
            }
        }
        texts
    }
}

#[derive(Debug, Default)]
struct Record {
    times: Vec<Instant>,
    urls: Vec<String>,
}

/// Connector that follows a script.
#[derive(Debug)]
pub(crate) struct ScriptedConnector {
    script: Mutex<VecDeque<Script>>,
    fallback: Script,
    record: Mutex<Record>,
    remotes: mpsc::UnboundedSender<RemoteEnd>,
}

impl ScriptedConnector {
    pub(crate) fn new(
        script: Vec<Script>,
        fallback: Script,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<RemoteEnd>) {
        let (remotes, remotes_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                script: Mutex::new(script.into()),
                fallback,
                record: Mutex::new(Record::default()),
                remotes,
            }),
            remotes_rx,
        )
    }

    pub(crate) fn connect_count(&self) -> usize {
        self.record.lock().unwrap().times.len()
    }

    pub(crate) fn urls(&self) -> Vec<String> {
        self.record.lock().unwrap().urls.clone()
    }

    pub(crate) fn attempt_times(&self) -> Vec<Instant> {
        self.record.lock().unwrap().times.clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, url: &str) -> Result<Link> {
        {
            let mut record = self.record.lock().unwrap();
            record.times.push(Instant::now());
            record.urls.push(url.to_string());
        }
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match step {
            Script::Accept => {
                let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
                let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                let _ = self.remotes.send(RemoteEnd {
                    inbound: inbound_tx,
                    outbound: outbound_rx,
                });
                Ok((
                    Box::new(MemoryWriter { tx: outbound_tx }),
                    Box::new(MemoryReader { rx: inbound_rx }),
                ))
            }
            Script::Refuse(message) => Err(anyhow!("{message}")),
            Script::Hang => std::future::pending().await,
        }
    }
}

struct MemoryWriter {
    tx: mpsc::UnboundedSender<ClientFrame>,
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn send_text(&mut self, text: &str) -> Result<()> {
        self.tx
            .send(ClientFrame::Text(text.to_string()))
            .map_err(|_| anyhow!("remote end gone"))
    }

    async fn send_close(&mut self, code: u16, reason: &str) -> Result<()> {
        self.tx
            .send(ClientFrame::Close {
                code,
                reason: reason.to_string(),
            })
            .map_err(|_| anyhow!("remote end gone"))
    }
}

struct MemoryReader {
    rx: mpsc::UnboundedReceiver<Result<WsMessage>>,
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn recv(&mut self) -> Option<Result<WsMessage>> {
        self.rx.recv().await
    }
}
