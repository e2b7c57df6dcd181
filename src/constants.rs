//! Application-wide constants for strack.
//!
//! Centralizes the close codes, reconnection defaults and location policy
//! defaults shared by the transport, the sessions and the configuration
//! layer.
//!
//! # Categories
//!
//! - **Close codes**: WebSocket status codes with protocol meaning
//! - **Reconnection**: attempt budget and retry delay
//! - **Location**: default watch policy
//! - **Server**: default endpoint

use std::time::Duration;

// ============================================================================
// Close codes
// ============================================================================

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// Abnormal closure: the connection dropped without a close frame.
///
/// Never sent on the wire; reported locally for handshake failures, read
/// errors and streams that end without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Policy violation, e.g. a bad or expired credential. Terminal.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// The sender explicitly ended its transmission. Terminal.
pub const CLOSE_SENDER_ENDED: u16 = 4000;

// ============================================================================
// Reconnection
// ============================================================================

/// Default number of reconnect attempts after the initial connection.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Default fixed delay before each reconnect attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// How long `open`/`shutdown` wait for a previous driver task to exit after
/// asking it to close, before aborting it.
pub const DRIVER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a session `stop` waits for its actor task before aborting it.
pub const SESSION_STOP_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Location
// ============================================================================

/// Minimum time between two delivered fixes.
///
/// Matches the 30 s `minTime` the Android location service requested.
pub const DEFAULT_MIN_FIX_INTERVAL: Duration = Duration::from_secs(30);

/// Minimum movement in meters before a new fix is delivered.
pub const DEFAULT_MIN_DISTANCE_METERS: f64 = 1.0;

/// Buffer size of a geolocation watch channel.
pub const WATCH_CHANNEL_CAPACITY: usize = 64;

// ============================================================================
// Server
// ============================================================================

/// Default WebSocket base URL (Android emulator alias of the dev host).
pub const DEFAULT_WS_URL: &str = "ws://10.0.2.2:8000/ws";
