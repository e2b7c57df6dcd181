//! Location data model and wire payload.
//!
//! - [`LocationFix`] - a position produced by a geolocation source
//! - [`LocationEvent`] - the JSON text frame exchanged between sender and receiver
//! - [`Coordinate`] - a bare latitude/longitude pair used by [`bearing`]
//!
//! Outbound frames carry `latitude`, `longitude` and `timestamp` (epoch
//! milliseconds). Inbound frames are validated strictly at the parse
//! boundary; anything that does not fit becomes a [`PayloadError`].

pub mod bearing;

use serde::{Deserialize, Serialize};

use crate::error::PayloadError;

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    /// Latitude in degrees, positive north.
    pub latitude: f64,
    /// Longitude in degrees, positive east.
    pub longitude: f64,
}

impl Coordinate {
    /// Create a coordinate.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// A single position fix from the geolocation source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Horizontal accuracy radius in meters, when the provider reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

impl LocationFix {
    /// Create a fix with an explicit timestamp.
    #[must_use]
    pub fn new(latitude: f64, longitude: f64, timestamp: i64) -> Self {
        Self {
            latitude,
            longitude,
            timestamp,
            accuracy: None,
        }
    }

    /// Attach a horizontal accuracy radius.
    pub fn with_accuracy(mut self, meters: f64) -> Self {
        self.accuracy = Some(meters);
        self
    }

    /// Position of this fix.
    #[must_use]
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

/// Location update exchanged over the stream.
///
/// `username` is optional on the wire; the receiver session fills it in
/// with the contact it is watching when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationEvent {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Display name of the sharing contact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl LocationEvent {
    /// Build the outbound event for a fix. Accuracy is not transmitted.
    #[must_use]
    pub fn from_fix(fix: &LocationFix) -> Self {
        Self {
            latitude: fix.latitude,
            longitude: fix.longitude,
            timestamp: fix.timestamp,
            username: None,
        }
    }

    /// Serialize to the JSON text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse and validate an inbound text frame.
    ///
    /// Unknown fields are ignored. `timestamp` must be a non-negative
    /// integer and both coordinates must be finite and in range.
    pub fn parse(text: &str) -> Result<Self, PayloadError> {
        let event: Self = serde_json::from_str(text)?;
        event.validate()?;
        Ok(event)
    }

    /// Position of this event.
    #[must_use]
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }

    fn validate(&self) -> Result<(), PayloadError> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(PayloadError::OutOfRange {
                field: "latitude",
                value: self.latitude.to_string(),
            });
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(PayloadError::OutOfRange {
                field: "longitude",
                value: self.longitude.to_string(),
            });
        }
        if self.timestamp < 0 {
            return Err(PayloadError::OutOfRange {
                field: "timestamp",
                value: self.timestamp.to_string(),
            });
        }
        Ok(())
    }
}
