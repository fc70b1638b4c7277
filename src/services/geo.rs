//! Geographic calculations

use crate::types::Coordinates;

/// Earth radius in kilometers
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Road distance coefficient (straight line to road)
pub const ROAD_COEFFICIENT: f64 = 1.3;

/// Average speed in km/h for travel time estimation
pub const AVERAGE_SPEED_KMH: f64 = 40.0;

/// Calculate Haversine distance between two points in kilometers
pub fn haversine_distance(from: &Coordinates, to: &Coordinates) -> f64 {
    let d_lat = (to.lat - from.lat).to_radians();
    let d_lon = (to.lng - from.lng).to_radians();

    let lat1 = from.lat.to_radians();
    let lat2 = to.lat.to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);

    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_KM * c
}

/// Estimate road distance in meters from straight-line distance
pub fn road_distance_meters(from: &Coordinates, to: &Coordinates, road_coefficient: f64) -> u64 {
    (haversine_distance(from, to) * road_coefficient * 1000.0).round() as u64
}

/// Estimate travel time in seconds for a road distance
pub fn travel_time_seconds(distance_meters: u64, average_speed_kmh: f64) -> u64 {
    ((distance_meters as f64 / 1000.0) / average_speed_kmh * 3600.0).round() as u64
}
