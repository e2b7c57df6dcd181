//! Shared WebSocket plumbing.
//!
//! Thin wrapper around `tokio-tungstenite` providing type-isolated
//! reader/writer halves. The session transport talks to these halves through
//! the [`crate::transport::connector`] traits and never touches
//! `tokio-tungstenite` directly.
//!
//! A single [`connect`] function performs the handshake (plain or TLS) and
//! returns a ([`WsWriter`], [`WsReader`]) pair ready for `tokio::select!`.

// Rust guideline compliant 2026-02

use std::borrow::Cow;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;

/// Concrete WebSocket stream type (avoids repeating the generic everywhere).
type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Close code reported when the peer closed without a status code.
pub const NO_STATUS_CODE: u16 = 1005;

/// Received WebSocket message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Ping frame with payload.
    Ping(Vec<u8>),
    /// Pong frame with payload.
    Pong(Vec<u8>),
    /// Close frame with status code and reason.
    Close {
        /// WebSocket close code (1000 = normal, 1005 = no code).
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
}

/// Write half of a WebSocket connection.
#[derive(Debug)]
pub struct WsWriter {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
}

impl WsWriter {
    /// Send a UTF-8 text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the send fails (connection closed, I/O error).
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Text(text.to_string()))
            .await
            .context("WebSocket send_text failed")
    }

    /// Send a close frame carrying `code` and `reason`.
    ///
    /// # Errors
    ///
    /// Returns an error if the send fails.
    pub async fn send_close(&mut self, code: u16, reason: &str) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: Cow::Owned(reason.to_string()),
        };
        self.sink
            .send(tungstenite::Message::Close(Some(frame)))
            .await
            .context("WebSocket send_close failed")
    }
}

/// Read half of a WebSocket connection.
#[derive(Debug)]
pub struct WsReader {
    stream: futures_util::stream::SplitStream<WsStream>,
}

impl WsReader {
    /// Receive the next message, returning `None` when the stream ends.
    ///
    /// Raw `Frame` variants are skipped internally.
    pub async fn recv(&mut self) -> Option<Result<WsMessage>> {
        loop {
            match self.stream.next().await {
                Some(Ok(message)) => {
                    if let Some(message) = translate(message) {
                        return Some(Ok(message));
                    }
                }
                Some(Err(e)) => {
                    return Some(Err(anyhow::anyhow!("WebSocket read error: {e}")));
                }
                None => return None,
            }
        }
    }
}

/// Map a tungstenite message onto [`WsMessage`]. Raw frames map to `None`.
fn translate(message: tungstenite::Message) -> Option<WsMessage> {
    match message {
        tungstenite::Message::Text(text) => Some(WsMessage::Text(text.to_string())),
        tungstenite::Message::Binary(data) => Some(WsMessage::Binary(data.to_vec())),
        tungstenite::Message::Ping(data) => Some(WsMessage::Ping(data.to_vec())),
        tungstenite::Message::Pong(data) => Some(WsMessage::Pong(data.to_vec())),
        tungstenite::Message::Close(close_frame) => {
            let (code, reason) = close_frame
                .map(|cf| (cf.code.into(), cf.reason.to_string()))
                .unwrap_or((NO_STATUS_CODE, String::new()));
            Some(WsMessage::Close { code, reason })
        }
        tungstenite::Message::Frame(_) => None,
    }
}

/// Connect to a WebSocket URL.
///
/// Performs the WebSocket handshake and returns split (writer, reader)
/// halves for independent use in `tokio::select!` loops.
///
/// # Errors
///
/// Returns an error if the URL is invalid or the handshake fails.
pub async fn connect(url: &str) -> Result<(WsWriter, WsReader)> {
    use tungstenite::client::IntoClientRequest;

    let request = url
        .into_client_request()
        .with_context(|| format!("invalid WebSocket URL: {}", redact_query(url)))?;

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .context("WebSocket connect failed")?;

    let (sink, stream) = ws_stream.split();

    Ok((WsWriter { sink }, WsReader { stream }))
}

/// Convert an HTTP(S) URL to WS(S) scheme.
///
/// Passes `ws://` and `wss://` through unchanged.
#[must_use]
pub fn http_to_ws_scheme(url: &str) -> String {
    if url.starts_with("wss://") || url.starts_with("ws://") {
        url.to_string()
    } else {
        url.replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1)
    }
}

/// Strip the query string so credentials carried there never reach logs.
#[must_use]
pub fn redact_query(url: &str) -> String {
    match url.split_once('?') {
        Some((base, _)) => format!("{base}?<redacted>"),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_to_ws_scheme_https() {
        assert_eq!(
            http_to_ws_scheme("https://example.com"),
            "wss://example.com"
        );
    }

    #[test]
    fn test_http_to_ws_scheme_http() {
        assert_eq!(
            http_to_ws_scheme("http://10.0.2.2:8000/ws"),
            "ws://10.0.2.2:8000/ws"
        );
    }

    #[test]
    fn test_http_to_ws_scheme_ws_passthrough() {
        assert_eq!(
            http_to_ws_scheme("ws://localhost:8000/ws"),
            "ws://localhost:8000/ws"
        );
    }

    #[test]
    fn test_redact_query_hides_token() {
        assert_eq!(
            redact_query("ws://host/ws/send?jwt=abc.def"),
            "ws://host/ws/send?<redacted>"
        );
        assert_eq!(redact_query("ws://host/ws/send"), "ws://host/ws/send");
    }

    #[test]
    fn test_translate_close_without_frame_uses_no_status_code() {
        let message = translate(tungstenite::Message::Close(None));
        assert_eq!(
            message,
            Some(WsMessage::Close {
                code: NO_STATUS_CODE,
                reason: String::new()
            })
        );
    }

    #[test]
    fn test_translate_close_with_application_code() {
        let frame = CloseFrame {
            code: CloseCode::from(4000),
            reason: Cow::Borrowed("transmission ended"),
        };
        let message = translate(tungstenite::Message::Close(Some(frame)));
        assert_eq!(
            message,
            Some(WsMessage::Close {
                code: 4000,
                reason: "transmission ended".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_connect_invalid_url_returns_error() {
        let result = connect("not-a-url").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_connect_unreachable_host_returns_error() {
        let result = connect("ws://127.0.0.1:1/ws/send").await;
        assert!(result.is_err());
    }
}
