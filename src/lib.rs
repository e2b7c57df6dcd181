//! STrack - real-time location streaming sessions.
//!
//! This crate provides the core of the strack client: it owns long-lived
//! WebSocket streams that carry GPS fixes from a sharing device to the
//! contacts watching it, recovers from connection loss, and exposes an
//! event-driven contract to both sides.
//!
//! # Architecture
//!
//! ```text
//!   GeolocationSource → SenderSession → SessionTransport → relay
//!                                                            │
//!   ReceiverListener ← ReceiverSession ← SessionTransport ←──┘
//! ```
//!
//! - **Session Transport** - one connection per endpoint, reconnection
//!   policy, close-code handling
//! - **Sender Session** - forwards fixes while the stream is open, holds an
//!   execution lease while active
//! - **Receiver Session** - validates inbound updates, derives bearing,
//!   reports connection status
//!
//! # Modules
//!
//! - [`transport`] - session transport and reconnection policy
//! - [`session`] - sender/receiver sessions and the foreground shim
//! - [`geolocation`] - geolocation source seam and bundled sources
//! - [`location`] - fix/event data model and bearing math
//! - [`config`] - configuration loading/saving

pub mod config;
pub mod constants;
pub mod env;
pub mod error;
pub mod geolocation;
pub mod location;
pub mod session;
pub mod transport;
pub mod ws;

// Re-export commonly used types
pub use config::Config;
pub use error::{GeolocationError, PayloadError, SessionError, TransportError};
pub use geolocation::{GeolocationSource, WatchOptions};
pub use location::{LocationEvent, LocationFix};
pub use session::{
    ChannelListener, CloseKind, CloseStatus, LocationUpdate, ReceiverEvent, ReceiverListener,
    ReceiverSession, SenderSession,
};
pub use transport::{
    ConnectionState, SessionEndpoint, SessionTransport, TransportEvent, WsConnector,
};
