/// Spherical-Earth destination point projection
///
/// Used by the position-spoofing attack to place a forged event a short
/// distance ahead of an observed vehicle.

/// Mean Earth radius in kilometres
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Project `distance_km` from (`lat`, `lon`) along `bearing_deg` (clockwise
/// from north). Coordinates are in degrees; the result is `(lat2, lon2)`.
pub fn project(lat: f64, lon: f64, distance_km: f64, bearing_deg: f64) -> (f64, f64) {
    project_with_radius(lat, lon, distance_km, bearing_deg, EARTH_RADIUS_KM)
}

pub fn project_with_radius(
    lat: f64,
    lon: f64,
    distance: f64,
    bearing_deg: f64,
    radius: f64,
) -> (f64, f64) {
    let lat1 = lat.to_radians();
    let lon1 = lon.to_radians();
    let bearing = bearing_deg.to_radians();
    let delta = distance / radius;

    let lat2 = (lat1.sin() * delta.cos() + lat1.cos() * delta.sin() * bearing.cos()).asin();
    let lon2 = lon1
        + (bearing.sin() * delta.sin() * lat1.cos()).atan2(delta.cos() - lat1.sin() * lat2.sin());

    (lat2.to_degrees(), lon2.to_degrees())
}
