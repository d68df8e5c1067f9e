//! Geodesic calculations for movement plausibility

use crate::types::{Coordinate, LocationSample};

/// Mean Earth radius used by the haversine formula
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Great-circle distance between two points in meters (haversine)
pub fn distance_meters(a: Coordinate, b: Coordinate) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let d_phi = (b.lat - a.lat).to_radians();
    let d_lambda = (b.lng - a.lng).to_radians();

    let h = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    // rounding can push h fractionally past 1 for antipodal points
    let h = h.min(1.0);

    2.0 * EARTH_RADIUS_METERS * h.sqrt().asin()
}

/// Speed in km/h needed to travel from `a` to `b`.
///
/// `None` when `b` is not strictly after `a`; callers skip such pairs.
pub fn speed_kph(a: &LocationSample, b: &LocationSample) -> Option<f64> {
    let dt_ms = (b.ts - a.ts).num_milliseconds();
    if dt_ms <= 0 {
        return None;
    }

    let dt_secs = dt_ms as f64 / 1000.0;
    Some(distance_meters(a.coordinate(), b.coordinate()) / dt_secs * 3.6)
}
