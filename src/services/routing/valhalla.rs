//! Valhalla routing engine client
//!
//! Valhalla API documentation:
//! https://valhalla.github.io/valhalla/api/optimized/api-reference/
//! https://valhalla.github.io/valhalla/api/turn-by-turn/api-reference/

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{RouteGeometry, RouteRequest, RouteResult, RoutingService};
use crate::types::Leg;

/// Valhalla client configuration
#[derive(Debug, Clone)]
pub struct ValhallaConfig {
    /// Base URL of Valhalla server (e.g., "http://localhost:8002")
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

impl Default for ValhallaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8002".to_string(),
            timeout_seconds: 30,
        }
    }
}

impl ValhallaConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            ..Default::default()
        }
    }
}

/// Valhalla routing client
pub struct ValhallaClient {
    client: Client,
    config: ValhallaConfig,
}

impl ValhallaClient {
    pub fn new(config: ValhallaConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, config })
    }

    /// Locations in request order: origin, waypoints, destination
    fn build_request(&self, request: &RouteRequest) -> ValhallaRouteRequest {
        let locations = std::iter::once(&request.origin)
            .chain(request.waypoints.iter())
            .chain(std::iter::once(&request.destination))
            .map(|c| ValhallaLocation {
                lat: c.lat,
                lon: c.lng,
                // 500m radius for geocoded coordinates that may be slightly off-road
                radius: Some(500),
            })
            .collect();

        ValhallaRouteRequest {
            locations,
            costing: "auto".to_string(),
            units: "kilometers".to_string(),
            directions_type: "none".to_string(),
        }
    }

    fn endpoint(&self, request: &RouteRequest) -> &'static str {
        // Nothing to reorder with fewer than two waypoints
        if request.optimize && request.waypoints.len() >= 2 {
            "optimized_route"
        } else {
            "route"
        }
    }
}

#[async_trait]
impl RoutingService for ValhallaClient {
    async fn route(&self, request: &RouteRequest) -> Result<RouteResult> {
        let endpoint = self.endpoint(request);
        let url = format!("{}/{}", self.config.base_url, endpoint);
        let body = self.build_request(request);

        debug!(
            "Requesting {} from Valhalla for {} waypoints",
            endpoint,
            request.waypoints.len()
        );

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("Failed to send route request to Valhalla")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Valhalla {} returned error {}: {}", endpoint, status, body);
        }

        let route_response: RouteResponse = response
            .json()
            .await
            .context("Failed to parse Valhalla route response")?;

        route_result(route_response, request.waypoints.len())
    }

    fn name(&self) -> &str {
        "Valhalla"
    }
}

/// Convert a Valhalla trip into a waypoint permutation, legs and geometry
fn route_result(response: RouteResponse, waypoint_count: usize) -> Result<RouteResult> {
    let trip = response.trip;

    // optimized_route reports each location's position in the request;
    // plain route keeps request order and omits it
    let waypoint_order = if trip.locations.iter().any(|l| l.original_index.is_some()) {
        if trip.locations.len() != waypoint_count + 2 {
            anyhow::bail!(
                "Valhalla returned {} locations for {} waypoints",
                trip.locations.len(),
                waypoint_count
            );
        }
        trip.locations[1..trip.locations.len() - 1]
            .iter()
            .map(|l| match l.original_index {
                Some(index) if (1..=waypoint_count).contains(&index) => Ok(index - 1),
                other => anyhow::bail!("Unexpected waypoint index {:?} in Valhalla response", other),
            })
            .collect::<Result<Vec<_>>>()?
    } else {
        (0..waypoint_count).collect()
    };

    let legs = trip
        .legs
        .iter()
        .map(|leg| Leg {
            // kilometers → meters
            distance_meters: (leg.summary.length * 1000.0).round() as u64,
            duration_seconds: leg.summary.time.round() as u64,
        })
        .collect();

    // Skip the first point of subsequent legs (it's the same as last point of previous leg)
    let mut coordinates: Vec<[f64; 2]> = Vec::new();
    for (i, leg) in trip.legs.iter().enumerate() {
        let leg_coords = decode_polyline(&leg.shape, 6)?;
        if i == 0 {
            coordinates.extend(leg_coords);
        } else {
            coordinates.extend(leg_coords.into_iter().skip(1));
        }
    }

    debug!(
        "Received route with {} points from {} legs",
        coordinates.len(),
        trip.legs.len()
    );

    Ok(RouteResult {
        waypoint_order,
        legs,
        geometry: RouteGeometry { coordinates },
    })
}

// Valhalla API types

#[derive(Debug, Serialize, Clone)]
struct ValhallaLocation {
    lat: f64,
    lon: f64,
    /// Radius in meters for snapping to roads
    #[serde(skip_serializing_if = "Option::is_none")]
    radius: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ValhallaRouteRequest {
    locations: Vec<ValhallaLocation>,
    costing: String,
    units: String,
    directions_type: String,
}

#[derive(Debug, Deserialize)]
struct RouteResponse {
    trip: ValhallaTrip,
}

#[derive(Debug, Deserialize)]
struct ValhallaTrip {
    #[serde(default)]
    locations: Vec<TripLocation>,
    legs: Vec<ValhallaLeg>,
}

#[derive(Debug, Deserialize)]
struct TripLocation {
    #[serde(default)]
    original_index: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ValhallaLeg {
    summary: LegSummary,
    /// Encoded polyline shape
    shape: String,
}

#[derive(Debug, Deserialize)]
struct LegSummary {
    /// Kilometers (units="kilometers")
    length: f64,
    /// Seconds
    time: f64,
}

/// Decode one zigzag-encoded varint starting at `*i`
fn decode_value(bytes: &[u8], i: &mut usize) -> Result<i64> {
    let mut shift = 0;
    let mut result = 0i64;
    loop {
        let Some(&b) = bytes.get(*i) else {
            anyhow::bail!("Invalid polyline encoding");
        };
        if shift >= 64 {
            anyhow::bail!("Polyline value too long at byte {}", *i);
        }
        let byte = b as i64 - 63;
        *i += 1;
        result |= (byte & 0x1f) << shift;
        shift += 5;
        if byte < 0x20 {
            break;
        }
    }
    Ok(if result & 1 != 0 { !(result >> 1) } else { result >> 1 })
}

/// Decode Valhalla's encoded polyline format
/// Precision is 6 decimal places for Valhalla (vs 5 for Google)
fn decode_polyline(encoded: &str, precision: u32) -> Result<Vec<[f64; 2]>> {
    let factor = 10_f64.powi(precision as i32);
    let bytes = encoded.as_bytes();
    let mut coordinates = Vec::new();
    let mut lat = 0i64;
    let mut lng = 0i64;
    let mut i = 0;

    while i < bytes.len() {
        lat = lat
            .checked_add(decode_value(bytes, &mut i)?)
            .context("Polyline latitude out of range")?;
        lng = lng
            .checked_add(decode_value(bytes, &mut i)?)
            .context("Polyline longitude out of range")?;
        // GeoJSON uses [lng, lat] order
        coordinates.push([lng as f64 / factor, lat as f64 / factor]);
    }

    Ok(coordinates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Coordinates;

    fn client() -> ValhallaClient {
        ValhallaClient::new(ValhallaConfig::default()).unwrap()
    }

    fn request(waypoints: usize, optimize: bool) -> RouteRequest {
        RouteRequest {
            origin: Coordinates { lat: 13.7563, lng: 100.5018 },
            destination: Coordinates { lat: 13.7563, lng: 100.5018 },
            waypoints: (0..waypoints)
                .map(|i| Coordinates { lat: 13.8 + i as f64 * 0.01, lng: 100.6 })
                .collect(),
            optimize,
        }
    }

    #[test]
    fn test_valhalla_config() {
        let config = ValhallaConfig::default();
        assert_eq!(config.base_url, "http://localhost:8002");
        assert_eq!(config.timeout_seconds, 30);
        assert_eq!(ValhallaConfig::new("http://valhalla:8002/").base_url, "http://valhalla:8002");
    }

    #[test]
    fn test_build_request_orders_locations() {
        let body = client().build_request(&request(2, true));

        assert_eq!(body.locations.len(), 4);
        assert_eq!(body.costing, "auto");
        assert_eq!(body.units, "kilometers");
        assert!((body.locations[0].lat - 13.7563).abs() < 1e-9);
        assert!((body.locations[1].lat - 13.8).abs() < 1e-9);
        assert!((body.locations[2].lat - 13.81).abs() < 1e-9);
        assert!((body.locations[3].lon - 100.5018).abs() < 1e-9);
    }

    #[test]
    fn test_endpoint_selection() {
        let client = client();
        assert_eq!(client.endpoint(&request(3, true)), "optimized_route");
        assert_eq!(client.endpoint(&request(1, true)), "route");
        assert_eq!(client.endpoint(&request(3, false)), "route");
    }

    #[test]
    fn test_decode_polyline_precision_6() {
        // Single point (lat 38.5, lng -120.2) at precision 6
        let encoded = "_izlhA~rlgdF";
        let coords = decode_polyline(encoded, 6).unwrap();
        assert_eq!(coords.len(), 1);
        assert!((coords[0][0] - (-120.2)).abs() < 1e-6);
        assert!((coords[0][1] - 38.5).abs() < 1e-6);
    }

    #[test]
    fn test_decode_polyline_rejects_truncated_input() {
        assert!(decode_polyline("_izlhA~rlgd", 6).is_err());
        assert!(decode_polyline("", 6).unwrap().is_empty());
    }

    #[test]
    fn test_decode_polyline_rejects_overlong_values() {
        assert!(decode_polyline("~~~~~~~~~~~~~~~~", 6).is_err());
        assert!(decode_polyline(&"~".repeat(40), 6).is_err());
    }

    #[test]
    fn test_route_result_from_optimized_response() {
        let json = r#"{
            "trip": {
                "locations": [
                    {"original_index": 0}, {"original_index": 2},
                    {"original_index": 1}, {"original_index": 3}
                ],
                "legs": [
                    {"summary": {"length": 1.5, "time": 120.4}, "shape": "_izlhA~rlgdF"},
                    {"summary": {"length": 2.0, "time": 200.0}, "shape": "_izlhA~rlgdF"},
                    {"summary": {"length": 0.25, "time": 30.0}, "shape": "_izlhA~rlgdF"}
                ]
            }
        }"#;
        let response: RouteResponse = serde_json::from_str(json).unwrap();

        let result = route_result(response, 2).unwrap();

        assert_eq!(result.waypoint_order, vec![1, 0]);
        assert_eq!(result.legs.len(), 3);
        assert_eq!(result.legs[0], Leg { distance_meters: 1500, duration_seconds: 120 });
        assert_eq!(result.legs[2].distance_meters, 250);
        // First point of later legs is dropped
        assert_eq!(result.geometry.coordinates.len(), 1);
    }

    #[test]
    fn test_route_result_plain_route_keeps_request_order() {
        let json = r#"{"trip": {"locations": [{}, {}, {}],
            "legs": [{"summary": {"length": 1.0, "time": 60.0}, "shape": ""},
                     {"summary": {"length": 1.0, "time": 60.0}, "shape": ""}]}}"#;
        let response: RouteResponse = serde_json::from_str(json).unwrap();

        let result = route_result(response, 1).unwrap();
        assert_eq!(result.waypoint_order, vec![0]);
        assert!(result.geometry.coordinates.is_empty());
    }

    #[test]
    fn test_route_result_rejects_bad_index() {
        let json = r#"{"trip": {"locations": [
                {"original_index": 0}, {"original_index": 0}, {"original_index": 2}],
            "legs": []}}"#;
        let response: RouteResponse = serde_json::from_str(json).unwrap();
        assert!(route_result(response, 1).is_err());
    }

    #[test]
    fn test_valhalla_client_name() {
        assert_eq!(client().name(), "Valhalla");
    }

    #[tokio::test]
    #[ignore = "Requires running Valhalla server"]
    async fn test_valhalla_optimized_round_trip() {
        let client = ValhallaClient::new(ValhallaConfig::new("http://localhost:8002")).unwrap();

        let result = client.route(&request(3, true)).await.unwrap();

        let mut order = result.waypoint_order.clone();
        order.sort_unstable();
        assert_eq!(order, vec![0, 1, 2]);
        assert_eq!(result.legs.len(), 4);
        assert!(result.geometry.coordinates.len() > 10);
    }
}
