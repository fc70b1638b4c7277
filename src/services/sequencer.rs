//! Stop sequencing
//!
//! Asks the routing service for a visiting order of each trip's stops and
//! attaches the leg distances. A failed or malformed answer never fails the
//! run: the trip keeps its build order and its distances stay unknown.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::defaults::MAX_ROUTING_WAYPOINTS;
use crate::services::rate_limiter::RateLimiter;
use crate::services::routing::{RouteRequest, RouteResult, RoutingService};
use crate::types::{Coordinates, Order, RoutingStatus, SequencedTrip, Trip};

/// Sequences trips against one routing service
pub struct StopSequencer<'a> {
    routing: &'a dyn RoutingService,
    /// Return to the depot after the last stop
    round_trip: bool,
    limiter: RateLimiter,
}

impl<'a> StopSequencer<'a> {
    pub fn new(routing: &'a dyn RoutingService, round_trip: bool, limiter: RateLimiter) -> Self {
        Self {
            routing,
            round_trip,
            limiter,
        }
    }

    /// Route one trip.
    ///
    /// Round trip: every order is a waypoint between depot and depot.
    /// One-way: the last order is the fixed destination and the others are
    /// waypoints.
    pub async fn sequence(&self, trip: Trip, depot: Coordinates) -> SequencedTrip {
        let request = match self.build_request(&trip, depot) {
            Ok(request) => request,
            Err(reason) => {
                warn!("Trip {} not routed: {}", trip.id, reason);
                return SequencedTrip::unrouted(trip, RoutingStatus::Unavailable(reason));
            }
        };

        let result = match self.routing.route(&request).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Routing trip {} with {} failed: {:#}", trip.id, self.routing.name(), e);
                return SequencedTrip::unrouted(trip, RoutingStatus::Unavailable(e.to_string()));
            }
        };

        if let Err(reason) = validate(&request, &result) {
            warn!("Discarding route for trip {}: {}", trip.id, reason);
            return SequencedTrip::unrouted(trip, RoutingStatus::Unavailable(reason));
        }

        let waypoint_orders = if self.round_trip {
            &trip.orders[..]
        } else {
            &trip.orders[..trip.orders.len() - 1]
        };
        let mut stops: Vec<Order> = result
            .waypoint_order
            .iter()
            .map(|&i| waypoint_orders[i].clone())
            .collect();
        if !self.round_trip {
            stops.extend(trip.orders.last().cloned());
        }

        let sequenced = SequencedTrip {
            trip,
            stops,
            legs: result.legs,
            status: RoutingStatus::Routed,
            geometry: result.geometry.coordinates,
        };
        debug!(
            "Trip {} routed: {} stops, {:.1} km",
            sequenced.trip.id,
            sequenced.stops.len(),
            sequenced.total_distance_km().unwrap_or_default()
        );
        sequenced
    }

    /// Route trips one at a time, spaced by the rate limiter.
    ///
    /// After cancellation no further routing calls are made; the remaining
    /// trips keep their build order with status `Skipped`.
    pub async fn sequence_all(
        &self,
        trips: Vec<Trip>,
        depot: Coordinates,
        cancel: &CancellationToken,
    ) -> Vec<SequencedTrip> {
        let mut sequenced = Vec::with_capacity(trips.len());

        for trip in trips {
            if cancel.is_cancelled() {
                debug!("Trip {} skipped, run cancelled", trip.id);
                sequenced.push(SequencedTrip::unrouted(trip, RoutingStatus::Skipped));
                continue;
            }
            self.limiter.wait().await;
            sequenced.push(self.sequence(trip, depot).await);
        }

        let routed = sequenced
            .iter()
            .filter(|t| t.status == RoutingStatus::Routed)
            .count();
        info!(
            "Sequenced {} trips with {}: {} routed, {} not routed",
            sequenced.len(),
            self.routing.name(),
            routed,
            sequenced.len() - routed
        );
        sequenced
    }

    fn build_request(&self, trip: &Trip, depot: Coordinates) -> Result<RouteRequest, String> {
        let points = trip
            .orders
            .iter()
            .map(|o| o.coordinates().ok_or_else(|| format!("order {} has no coordinates", o.id)))
            .collect::<Result<Vec<_>, _>>()?;

        let (destination, waypoints) = if self.round_trip {
            (depot, points)
        } else {
            match points.split_last() {
                Some((last, rest)) => (*last, rest.to_vec()),
                None => return Err("trip has no stops".to_string()),
            }
        };

        if waypoints.len() > MAX_ROUTING_WAYPOINTS {
            return Err(format!(
                "{} waypoints exceed the routing limit of {}",
                waypoints.len(),
                MAX_ROUTING_WAYPOINTS
            ));
        }
        if self.round_trip && waypoints.is_empty() {
            return Err("trip has no stops".to_string());
        }

        Ok(RouteRequest {
            origin: depot,
            destination,
            waypoints,
            optimize: true,
        })
    }
}

/// The answer must be a permutation of the waypoints with one leg per hop
fn validate(request: &RouteRequest, result: &RouteResult) -> Result<(), String> {
    let n = request.waypoints.len();
    let mut seen = vec![false; n];
    for &i in &result.waypoint_order {
        if i >= n || seen[i] {
            return Err(format!("waypoint order {:?} is not a permutation", result.waypoint_order));
        }
        seen[i] = true;
    }
    if result.waypoint_order.len() != n {
        return Err(format!("waypoint order {:?} is not a permutation", result.waypoint_order));
    }
    if result.legs.len() != request.expected_legs() {
        return Err(format!(
            "expected {} legs, got {}",
            request.expected_legs(),
            result.legs.len()
        ));
    }
    Ok(())
}
