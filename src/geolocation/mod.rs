//! Geolocation source collaborator.
//!
//! The platform (GPS provider, OS location service, or a recorded track)
//! sits behind [`GeolocationSource`]. A watch yields fixes through an
//! `mpsc` channel so the sender session can `select!` over fixes and
//! transport events without blocking either.
//!
//! # Implementations
//!
//! - [`ChannelSource`] - fed in-process through a [`FixFeed`] handle
//! - [`ReplaySource`] - replays a JSON-lines track file
//!
//! Both apply [`FixFilter`] so the [`WatchOptions`] policy holds no matter
//! how raw fixes arrive.

pub mod channel;
pub mod filter;
pub mod replay;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::constants::{DEFAULT_MIN_DISTANCE_METERS, DEFAULT_MIN_FIX_INTERVAL};
pub use crate::error::GeolocationError;
use crate::location::LocationFix;

pub use channel::{ChannelSource, FixFeed};
pub use filter::FixFilter;
pub use replay::ReplaySource;

/// Requested positioning accuracy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Accuracy {
    /// GPS-grade positioning.
    #[default]
    High,
    /// Wi-Fi / cell assisted positioning.
    Balanced,
    /// Coarse positioning.
    Low,
}

impl Accuracy {
    /// Worst accuracy radius, in meters, a fix may report and still be
    /// delivered under this policy.
    #[must_use]
    pub fn ceiling_meters(self) -> f64 {
        match self {
            Self::High => 100.0,
            Self::Balanced => 500.0,
            Self::Low => 5_000.0,
        }
    }
}

/// Policy for a continuous watch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatchOptions {
    /// Requested accuracy.
    pub accuracy: Accuracy,
    /// Minimum time between delivered fixes.
    pub min_interval: Duration,
    /// Minimum movement between delivered fixes.
    pub min_distance_meters: f64,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            accuracy: Accuracy::High,
            min_interval: DEFAULT_MIN_FIX_INTERVAL,
            min_distance_meters: DEFAULT_MIN_DISTANCE_METERS,
        }
    }
}

/// Identifier of an active watch, used to clear it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(pub u64);

/// An active watch: its id and the stream of fixes / errors.
///
/// The channel closes when the watch is cleared or the source ends.
#[derive(Debug)]
pub struct Watch {
    /// Handle for [`GeolocationSource::clear_watch`].
    pub id: WatchId,
    /// Fixes and non-fatal errors in the order the provider produced them.
    pub fixes: mpsc::Receiver<Result<LocationFix, GeolocationError>>,
}

/// Platform geolocation provider.
#[async_trait]
pub trait GeolocationSource: Send + Sync {
    /// Ask the user/platform for location permission.
    ///
    /// Resolves immediately when permission is already granted.
    async fn request_authorization(&self) -> Result<(), GeolocationError>;

    /// Start a continuous watch under `options`.
    fn watch(&self, options: WatchOptions) -> Result<Watch, GeolocationError>;

    /// Stop a watch. Unknown ids are ignored.
    fn clear_watch(&self, id: WatchId);
}
