//! Routing service for trip stop ordering and leg distances
//!
//! Uses Valhalla for production, mock for tests.

mod valhalla;

pub use valhalla::{ValhallaClient, ValhallaConfig};

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::services::geo::{
    haversine_distance, road_distance_meters, travel_time_seconds, AVERAGE_SPEED_KMH, ROAD_COEFFICIENT,
};
use crate::types::{Coordinates, Leg};

/// Route geometry as GeoJSON coordinates
/// Coordinates are in [longitude, latitude] order (GeoJSON standard)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RouteGeometry {
    pub coordinates: Vec<[f64; 2]>,
}

impl RouteGeometry {
    /// Straight lines through the given points
    pub fn from_coordinates(coords: &[Coordinates]) -> Self {
        Self {
            coordinates: coords.iter().map(|c| [c.lng, c.lat]).collect(),
        }
    }
}

/// One routing call: origin, intermediate waypoints, destination
#[derive(Debug, Clone)]
pub struct RouteRequest {
    pub origin: Coordinates,
    pub destination: Coordinates,
    pub waypoints: Vec<Coordinates>,
    /// Let the service reorder the waypoints; origin and destination stay fixed
    pub optimize: bool,
}

impl RouteRequest {
    /// Number of legs a complete answer must carry
    pub fn expected_legs(&self) -> usize {
        self.waypoints.len() + 1
    }
}

/// Routing answer
#[derive(Debug, Clone)]
pub struct RouteResult {
    /// Visit order as indices into `RouteRequest::waypoints`
    pub waypoint_order: Vec<usize>,
    /// origin → first waypoint, ..., last waypoint → destination
    pub legs: Vec<Leg>,
    pub geometry: RouteGeometry,
}

/// Routing service trait for abstraction (Valhalla, mock, etc.)
#[async_trait]
pub trait RoutingService: Send + Sync {
    async fn route(&self, request: &RouteRequest) -> Result<RouteResult>;

    /// Get service name for logging
    fn name(&self) -> &str;
}

/// Mock routing service for tests
/// Uses Haversine distance × coefficient for estimation
pub struct MockRoutingService {
    /// Coefficient for converting straight-line to road distance (default: 1.3)
    road_coefficient: f64,
    /// Average speed in km/h for time estimation (default: 40)
    average_speed_kmh: f64,
}

impl Default for MockRoutingService {
    fn default() -> Self {
        Self {
            road_coefficient: ROAD_COEFFICIENT,
            average_speed_kmh: AVERAGE_SPEED_KMH,
        }
    }
}

impl MockRoutingService {
    pub fn new() -> Self {
        Self::default()
    }

    fn leg(&self, from: &Coordinates, to: &Coordinates) -> Leg {
        let distance_meters = road_distance_meters(from, to, self.road_coefficient);
        Leg {
            distance_meters,
            duration_seconds: travel_time_seconds(distance_meters, self.average_speed_kmh),
        }
    }
}

/// Nearest-neighbor visiting order from `origin`; ties go to the lower index
pub fn nearest_neighbor_order(origin: &Coordinates, waypoints: &[Coordinates]) -> Vec<usize> {
    let mut visited = vec![false; waypoints.len()];
    let mut order = Vec::with_capacity(waypoints.len());
    let mut current = *origin;

    for _ in 0..waypoints.len() {
        let mut best: Option<(usize, f64)> = None;
        for (i, point) in waypoints.iter().enumerate() {
            if visited[i] {
                continue;
            }
            let distance = haversine_distance(&current, point);
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((i, distance));
            }
        }
        if let Some((i, _)) = best {
            visited[i] = true;
            order.push(i);
            current = waypoints[i];
        }
    }

    order
}

#[async_trait]
impl RoutingService for MockRoutingService {
    async fn route(&self, request: &RouteRequest) -> Result<RouteResult> {
        let waypoint_order = if request.optimize {
            nearest_neighbor_order(&request.origin, &request.waypoints)
        } else {
            (0..request.waypoints.len()).collect()
        };

        let mut path = Vec::with_capacity(request.waypoints.len() + 2);
        path.push(request.origin);
        path.extend(waypoint_order.iter().map(|&i| request.waypoints[i]));
        path.push(request.destination);

        let legs = path.windows(2).map(|pair| self.leg(&pair[0], &pair[1])).collect();

        Ok(RouteResult {
            waypoint_order,
            legs,
            geometry: RouteGeometry::from_coordinates(&path),
        })
    }

    fn name(&self) -> &str {
        "MockRouting"
    }
}

/// Create routing service with automatic Valhalla detection and fallback
///
/// Tries to connect to Valhalla if URL is provided. Falls back to mock
/// routing service if Valhalla is unavailable or URL is not configured.
pub async fn create_routing_service_with_fallback(valhalla_url: Option<&str>) -> Box<dyn RoutingService> {
    if let Some(url) = valhalla_url {
        match ValhallaClient::new(ValhallaConfig::new(url)) {
            Ok(client) => match check_valhalla_health(url).await {
                Ok(()) => {
                    info!("Valhalla routing service available at {}", url);
                    return Box::new(client);
                }
                Err(e) => {
                    warn!("Valhalla not available at {}: {}. Falling back to mock routing.", url, e);
                }
            },
            Err(e) => warn!("Failed to create Valhalla client: {}. Falling back to mock routing.", e),
        }
    }

    info!("Using mock routing service (Valhalla not configured or unavailable)");
    Box::new(MockRoutingService::new())
}

/// Check if Valhalla is healthy by making a simple status request
async fn check_valhalla_health(base_url: &str) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()?;

    let url = format!("{}/status", base_url.trim_end_matches('/'));
    let response = client.get(&url).send().await?;

    if response.status().is_success() {
        Ok(())
    } else {
        anyhow::bail!("Valhalla returned status {}", response.status())
    }
}
