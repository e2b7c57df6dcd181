//! Watch policy enforcement.

use std::time::Duration;

use super::WatchOptions;
use crate::location::bearing::distance_meters;
use crate::location::LocationFix;

/// Decides which raw fixes a watch delivers.
///
/// A fix passes when its reported accuracy is within the policy ceiling,
/// and either it is the first fix, or at least `min_interval` has elapsed
/// (by fix timestamps) and it moved at least `min_distance_meters` since the
/// last delivered fix.
#[derive(Debug, Clone)]
pub struct FixFilter {
    options: WatchOptions,
    last: Option<LocationFix>,
}

impl FixFilter {
    /// Create a filter for `options`.
    #[must_use]
    pub fn new(options: WatchOptions) -> Self {
        Self {
            options,
            last: None,
        }
    }

    /// Returns `true` if `fix` should be delivered, recording it as the last
    /// delivered fix.
    pub fn accept(&mut self, fix: &LocationFix) -> bool {
        if !self.passes(fix) {
            return false;
        }
        self.commit(fix);
        true
    }

    /// Whether `fix` passes the policy, without recording anything.
    #[must_use]
    pub fn passes(&self, fix: &LocationFix) -> bool {
        if !fix.latitude.is_finite() || !fix.longitude.is_finite() {
            return false;
        }
        if let Some(accuracy) = fix.accuracy {
            if accuracy > self.options.accuracy.ceiling_meters() {
                return false;
            }
        }

        if let Some(last) = &self.last {
            let elapsed_ms = fix.timestamp.saturating_sub(last.timestamp);
            let min_ms = duration_millis(self.options.min_interval);
            if elapsed_ms < min_ms {
                return false;
            }
            if distance_meters(last.coordinate(), fix.coordinate())
                < self.options.min_distance_meters
            {
                return false;
            }
        }

        true
    }

    /// Record `fix` as delivered; later fixes are measured from it.
    pub fn commit(&mut self, fix: &LocationFix) {
        self.last = Some(fix.clone());
    }
}

fn duration_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}
