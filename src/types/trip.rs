//! Trip types

use serde::{Deserialize, Serialize};

use super::{Coordinates, Order, VehicleClass};

/// A vehicle's trip as produced by the trip builder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trip {
    /// 1-based, in creation order
    pub id: u32,
    /// Orders in insertion (heuristic) order
    pub orders: Vec<Order>,
    /// `None` flags the trip as oversized
    pub vehicle: Option<VehicleClass>,
    pub total_weight_kg: f64,
    pub total_cases: u32,
}

impl Trip {
    pub fn new(id: u32, orders: Vec<Order>, vehicle: Option<VehicleClass>) -> Self {
        let total_weight_kg = orders.iter().map(|o| o.weight_kg).sum();
        let total_cases = orders.iter().fold(0u32, |total, o| total.saturating_add(o.cases));
        Self {
            id,
            orders,
            vehicle,
            total_weight_kg,
            total_cases,
        }
    }

    pub fn drops(&self) -> usize {
        self.orders.len()
    }

    pub fn is_oversized(&self) -> bool {
        self.vehicle.is_none()
    }

    /// Total weight divided by the assigned class's weight ceiling
    pub fn load_factor(&self) -> Option<f64> {
        self.vehicle
            .as_ref()
            .map(|v| self.total_weight_kg / v.max_weight_kg)
    }

    pub fn vehicle_label(&self) -> &str {
        self.vehicle
            .as_ref()
            .map(|v| v.label.as_str())
            .unwrap_or("OVERSIZED")
    }
}

/// Why an order could not be placed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeftoverReason {
    /// Geocoding was never attempted (e.g. the run was cancelled)
    LocationUnresolved,
    GeocodingFailed,
    /// Exceeds every vehicle class on its own
    NoVehicleFits,
}

impl LeftoverReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            LeftoverReason::LocationUnresolved => "location_unresolved",
            LeftoverReason::GeocodingFailed => "geocoding_failed",
            LeftoverReason::NoVehicleFits => "no_vehicle_fits",
        }
    }
}

/// An order left out of every trip for this run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeftoverOrder {
    pub order: Order,
    pub reason: LeftoverReason,
}

/// Trip builder output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripPlan {
    pub trips: Vec<Trip>,
    pub leftovers: Vec<LeftoverOrder>,
}

/// One leg between consecutive route points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Leg {
    pub distance_meters: u64,
    pub duration_seconds: u64,
}

/// Outcome of asking the routing service for a trip
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum RoutingStatus {
    Routed,
    /// Routing failed; heuristic order kept, distances unknown
    Unavailable(String),
    /// Run cancelled before this trip was routed
    Skipped,
}

impl RoutingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingStatus::Routed => "routed",
            RoutingStatus::Unavailable(_) => "unavailable",
            RoutingStatus::Skipped => "skipped",
        }
    }
}

/// A trip after stop sequencing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequencedTrip {
    pub trip: Trip,
    /// Display/report order of the stops
    pub stops: Vec<Order>,
    /// Depot to first stop, between stops, and (round trip) back to the depot
    pub legs: Vec<Leg>,
    pub status: RoutingStatus,
    /// GeoJSON `[lng, lat]` pairs, empty when unrouted
    pub geometry: Vec<[f64; 2]>,
}

impl SequencedTrip {
    /// Trip in heuristic order with unknown distances
    pub fn unrouted(trip: Trip, status: RoutingStatus) -> Self {
        Self {
            stops: trip.orders.clone(),
            trip,
            legs: vec![],
            status,
            geometry: vec![],
        }
    }

    pub fn total_distance_km(&self) -> Option<f64> {
        match self.status {
            RoutingStatus::Routed => Some(
                self.legs.iter().map(|l| l.distance_meters).sum::<u64>() as f64 / 1000.0,
            ),
            _ => None,
        }
    }

    pub fn total_duration_minutes(&self) -> Option<f64> {
        match self.status {
            RoutingStatus::Routed => Some(
                self.legs.iter().map(|l| l.duration_seconds).sum::<u64>() as f64 / 60.0,
            ),
            _ => None,
        }
    }

    /// Distance of the leg arriving at stop `index`, in km
    pub fn leg_distance_km(&self, index: usize) -> Option<f64> {
        self.legs.get(index).map(|l| l.distance_meters as f64 / 1000.0)
    }

    pub fn stop_coordinates(&self) -> Vec<Coordinates> {
        self.stops.iter().filter_map(|s| s.coordinates()).collect()
    }
}
