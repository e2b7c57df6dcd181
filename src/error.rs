//! Error taxonomy for the session layer.
//!
//! Transport failures never cross the session boundary as errors: the
//! driver converts them into [`crate::transport::TransportEvent`]s. The
//! types here cover what can fail synchronously (caller misuse, refused
//! permission, lease acquisition) and the inbound payload parse.

use thiserror::Error;

/// Errors returned by sender/receiver session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Geolocation authorization was refused. Terminal for this `start`.
    #[error("location permission denied")]
    PermissionDenied,
    /// The session transport rejected the operation.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The geolocation source could not start a watch.
    #[error(transparent)]
    Geolocation(#[from] GeolocationError),
    /// The foreground execution lease could not be acquired.
    #[error("failed to acquire execution lease: {0}")]
    Lease(String),
}

/// Errors raised synchronously by [`crate::transport::SessionTransport`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// `send` was called before any `open`.
    #[error("transport has not been opened")]
    NotStarted,
    /// The transport was shut down and cannot be reopened.
    #[error("transport has been disposed")]
    Disposed,
    /// The endpoint URL could not be built.
    #[error("invalid endpoint URL: {0}")]
    InvalidUrl(String),
}

/// Errors reported by a geolocation source.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GeolocationError {
    /// Authorization refused by the user or platform.
    #[error("location authorization denied")]
    Denied,
    /// No provider (GPS or network) is currently available.
    #[error("no location provider available")]
    Unavailable,
    /// The source failed to produce a fix.
    #[error("location source error: {0}")]
    Source(String),
}

/// An inbound frame that does not match the location event schema.
///
/// This is the `MalformedPayload` outcome: the frame is dropped and logged,
/// the session continues.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// Not valid JSON or a required field is missing / mistyped.
    #[error("malformed location payload: {0}")]
    Json(#[from] serde_json::Error),
    /// A field parsed but holds an impossible value.
    #[error("location payload field `{field}` out of range: {value}")]
    OutOfRange {
        /// Offending field name.
        field: &'static str,
        /// Offending value, formatted.
        value: String,
    },
}
