//! Planning run
//!
//! One `Planner` carries everything a run needs: settings, the vehicle rule
//! table, the geocoder, the routing service and the cancellation token. A run
//! resolves the depot and order locations, builds trips, sequences them, and
//! always returns a report, even when cancelled part way.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::services::geocoding::{resolve_depot, resolve_locations, Geocoder};
use crate::services::rate_limiter::RateLimiter;
use crate::services::routing::RoutingService;
use crate::services::sequencer::StopSequencer;
use crate::services::trip_builder::{BuildConfig, TripBuilder};
use crate::services::vehicle_rules::VehicleRules;
use crate::types::{Coordinates, LeftoverOrder, Order, RoutingStatus, SequencedTrip};

/// Per-run settings
#[derive(Debug, Clone)]
pub struct PlanSettings {
    pub depot_address: String,
    pub depot_coordinates: Option<Coordinates>,
    pub round_trip: bool,
    pub build: BuildConfig,
    pub geocode_interval_ms: u64,
    pub routing_interval_ms: u64,
}

impl PlanSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            depot_address: config.depot_address.clone(),
            depot_coordinates: config.depot_coordinates,
            round_trip: config.round_trip,
            build: BuildConfig {
                max_stops: config.max_stops,
                prefer_time_windows: config.prefer_time_windows,
                time_window_tolerance_minutes: config.time_window_tolerance_minutes,
                ..BuildConfig::default()
            },
            geocode_interval_ms: config.geocoder.interval_ms,
            routing_interval_ms: config.routing_interval_ms,
        }
    }
}

/// Run counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanStats {
    pub orders: usize,
    pub geocoded: usize,
    pub geocode_failures: usize,
    pub trips: usize,
    pub oversized_trips: usize,
    pub routing_failures: usize,
    pub skipped_trips: usize,
    pub leftovers: usize,
    pub assigned_weight_kg: f64,
    /// Sum over routed trips only
    pub routed_distance_km: f64,
    pub cancelled: bool,
}

/// Result of one planning run
#[derive(Debug, Clone)]
pub struct PlanReport {
    pub depot: Coordinates,
    pub trips: Vec<SequencedTrip>,
    pub leftovers: Vec<LeftoverOrder>,
    pub stats: PlanStats,
}

pub struct Planner<'a> {
    settings: PlanSettings,
    rules: &'a VehicleRules,
    geocoder: &'a dyn Geocoder,
    routing: &'a dyn RoutingService,
    cancel: CancellationToken,
}

impl<'a> Planner<'a> {
    pub fn new(
        settings: PlanSettings,
        rules: &'a VehicleRules,
        geocoder: &'a dyn Geocoder,
        routing: &'a dyn RoutingService,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            settings,
            rules,
            geocoder,
            routing,
            cancel,
        }
    }

    pub async fn plan(&self, mut orders: Vec<Order>) -> PlanReport {
        let order_count = orders.len();
        info!(
            "Planning {} orders (max {} stops, {})",
            order_count,
            self.settings.build.effective_max_stops(),
            if self.settings.round_trip { "round trip" } else { "one-way" }
        );

        let depot = resolve_depot(
            self.settings.depot_coordinates,
            &self.settings.depot_address,
            self.geocoder,
            &self.cancel,
        )
        .await;

        let geocode_limiter = RateLimiter::from_millis(self.settings.geocode_interval_ms);
        let geocoding = resolve_locations(&mut orders, self.geocoder, &geocode_limiter, &self.cancel).await;

        let plan = TripBuilder::new(self.rules, self.settings.build.clone()).build(&orders, depot);

        let sequencer = StopSequencer::new(
            self.routing,
            self.settings.round_trip,
            RateLimiter::from_millis(self.settings.routing_interval_ms),
        );
        let trips = sequencer.sequence_all(plan.trips, depot, &self.cancel).await;

        let stats = PlanStats {
            orders: order_count,
            geocoded: geocoding.resolved,
            geocode_failures: geocoding.failed,
            trips: trips.len(),
            oversized_trips: trips.iter().filter(|t| t.trip.is_oversized()).count(),
            routing_failures: trips
                .iter()
                .filter(|t| matches!(t.status, RoutingStatus::Unavailable(_)))
                .count(),
            skipped_trips: trips
                .iter()
                .filter(|t| t.status == RoutingStatus::Skipped)
                .count(),
            leftovers: plan.leftovers.len(),
            assigned_weight_kg: trips.iter().map(|t| t.trip.total_weight_kg).sum(),
            routed_distance_km: trips.iter().filter_map(|t| t.total_distance_km()).sum(),
            cancelled: self.cancel.is_cancelled(),
        };

        if stats.cancelled {
            warn!("Run cancelled: {} trips not routed", stats.skipped_trips);
        }
        info!(
            "Plan complete: {} trips, {} leftovers, {:.0} kg assigned, {:.1} km routed",
            stats.trips, stats.leftovers, stats.assigned_weight_kg, stats.routed_distance_km
        );

        PlanReport {
            depot,
            trips,
            leftovers: plan.leftovers,
            stats,
        }
    }
}
