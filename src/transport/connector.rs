//! Connection seam between the transport driver and the network.
//!
//! The driver only sees [`FrameWriter`] / [`FrameReader`] trait objects
//! produced by a [`Connector`]. [`WsConnector`] is the production
//! implementation over [`crate::ws`]; tests substitute an in-memory one.

use anyhow::Result;
use async_trait::async_trait;

use crate::ws::{self, WsMessage, WsReader, WsWriter};

/// Outbound half of an established link.
#[async_trait]
pub trait FrameWriter: Send {
    /// Send a UTF-8 text frame.
    async fn send_text(&mut self, text: &str) -> Result<()>;

    /// Send a close frame.
    async fn send_close(&mut self, code: u16, reason: &str) -> Result<()>;
}

/// Inbound half of an established link.
#[async_trait]
pub trait FrameReader: Send {
    /// Next frame, or `None` once the stream has ended. Must be cancel-safe.
    async fn recv(&mut self) -> Option<Result<WsMessage>>;
}

/// An established link: writer and reader halves.
pub type Link = (Box<dyn FrameWriter>, Box<dyn FrameReader>);

/// Opens links to endpoint URLs.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Perform the handshake with `url`.
    async fn connect(&self, url: &str) -> Result<Link>;
}

/// Connector over `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Link> {
        let (writer, reader) = ws::connect(url).await?;
        Ok((Box::new(writer), Box::new(reader)))
    }
}

#[async_trait]
impl FrameWriter for WsWriter {
    async fn send_text(&mut self, text: &str) -> Result<()> {
        WsWriter::send_text(self, text).await
    }

    async fn send_close(&mut self, code: u16, reason: &str) -> Result<()> {
        WsWriter::send_close(self, code, reason).await
    }
}

#[async_trait]
impl FrameReader for WsReader {
    async fn recv(&mut self) -> Option<Result<WsMessage>> {
        WsReader::recv(self).await
    }
}
