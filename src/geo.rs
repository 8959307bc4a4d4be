//! Great-circle distance and arrival estimates.

/// Mean Earth radius used by every geofence computation.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Assumed average bus speed for arrival estimates (~30 km/h).
pub const AVERAGE_BUS_SPEED_MPS: f64 = 8.33;

/// Haversine distance in meters between two WGS84 coordinates given in degrees.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_phi = (lat2 - lat1).to_radians();
    let delta_lambda = (lon2 - lon1).to_radians();

    let a = (delta_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Whole minutes (rounded up) to cover `distance_meters` at the assumed bus speed.
pub fn eta_minutes(distance_meters: f64) -> u32 {
    if !distance_meters.is_finite() || distance_meters <= 0.0 {
        return 0;
    }
    (distance_meters / AVERAGE_BUS_SPEED_MPS / 60.0).ceil() as u32
}

pub fn is_valid_coordinate(latitude: f64, longitude: f64) -> bool {
    latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude)
}
