//! Spherical-earth geodesy helpers.

use super::Coordinate;

/// Mean earth radius in meters.
const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

/// Points closer than this are the same place.
const COINCIDENT_METERS: f64 = 1e-3;

/// Great-circle initial bearing from `from` to `to`, in degrees `[0, 360)`.
///
/// 0 is due north, 90 due east. Returns `None` when the two points are
/// the same place, including different labels for it such as longitude
/// 180 and -180, or any longitude at a pole.
#[must_use]
pub fn initial_bearing(from: Coordinate, to: Coordinate) -> Option<f64> {
    if distance_meters(from, to) < COINCIDENT_METERS {
        return None;
    }

    let phi1 = from.latitude.to_radians();
    let phi2 = to.latitude.to_radians();
    let delta_lambda = (to.longitude - from.longitude).to_radians();

    let y = delta_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * delta_lambda.cos();
    let theta = y.atan2(x).to_degrees();

    let bearing = (theta + 360.0) % 360.0;
    // -0.0 and values that round to 360.0 both normalize to 0
    if bearing.is_finite() {
        Some(if bearing >= 360.0 { 0.0 } else { bearing.abs() })
    } else {
        None
    }
}

/// Haversine distance between two points, in meters.
#[must_use]
pub fn distance_meters(a: Coordinate, b: Coordinate) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let d_phi = (b.latitude - a.latitude).to_radians();
    let d_lambda = (b.longitude - a.longitude).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * h.sqrt().min(1.0).asin()
}
