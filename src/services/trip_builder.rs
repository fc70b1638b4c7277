//! Greedy trip builder
//!
//! Partitions a day's orders into vehicle trips. Each trip starts at the depot
//! and repeatedly takes the nearest order that keeps the trip classifiable,
//! preferring the province it is already in. The heuristic never backtracks:
//! a committed pick stays where it is.

use tracing::{debug, info, warn};

use crate::defaults::{
    DEFAULT_MAX_STOPS, MAX_ROUTING_WAYPOINTS, TIE_EPSILON_KM, TIME_WINDOW_TOLERANCE_MINUTES,
};
use crate::services::geo::haversine_distance;
use crate::services::vehicle_rules::{LoadProfile, VehicleRules};
use crate::types::{Coordinates, LeftoverOrder, LeftoverReason, Location, Order, Trip, TripPlan};

/// Configuration for the trip builder
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Maximum drops per trip, capped at the routing waypoint limit
    pub max_stops: usize,
    /// Candidates within this distance of the nearest one are taken by name
    pub tie_epsilon_km: f64,
    /// Serve earlier scheduled windows first
    pub prefer_time_windows: bool,
    pub time_window_tolerance_minutes: u16,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            max_stops: DEFAULT_MAX_STOPS,
            tie_epsilon_km: TIE_EPSILON_KM,
            prefer_time_windows: false,
            time_window_tolerance_minutes: TIME_WINDOW_TOLERANCE_MINUTES,
        }
    }
}

impl BuildConfig {
    pub fn effective_max_stops(&self) -> usize {
        self.max_stops.clamp(1, MAX_ROUTING_WAYPOINTS)
    }
}

/// An order with resolved coordinates, eligible for trips
struct Candidate<'a> {
    order: &'a Order,
    coordinates: Coordinates,
}

/// Trip builder over a fixed rule table
pub struct TripBuilder<'r> {
    rules: &'r VehicleRules,
    config: BuildConfig,
}

impl<'r> TripBuilder<'r> {
    pub fn new(rules: &'r VehicleRules, config: BuildConfig) -> Self {
        Self { rules, config }
    }

    /// Partition `orders` into trips and leftovers.
    ///
    /// Every order ends up in exactly one trip or in the leftovers. Orders
    /// without resolved coordinates are leftovers from the start.
    pub fn build(&self, orders: &[Order], depot: Coordinates) -> TripPlan {
        let mut plan = TripPlan::default();
        let mut pool: Vec<Candidate<'_>> = Vec::with_capacity(orders.len());

        for order in orders {
            match order.location {
                Location::Resolved(coordinates) => pool.push(Candidate { order, coordinates }),
                Location::Unresolved => plan.leftovers.push(LeftoverOrder {
                    order: order.clone(),
                    reason: LeftoverReason::LocationUnresolved,
                }),
                Location::Failed => plan.leftovers.push(LeftoverOrder {
                    order: order.clone(),
                    reason: LeftoverReason::GeocodingFailed,
                }),
            }
        }

        if !plan.leftovers.is_empty() {
            debug!("{} orders without coordinates go straight to leftovers", plan.leftovers.len());
        }

        let max_stops = self.config.effective_max_stops();
        let mut assigned = vec![false; pool.len()];
        let mut remaining = pool.len();

        while remaining > 0 {
            let mut picks: Vec<usize> = Vec::new();
            let mut load = LoadProfile::default();
            let mut cursor = depot;
            let mut cursor_province: Option<&str> = None;

            loop {
                if picks.len() >= max_stops {
                    break;
                }

                let mut candidates: Vec<usize> = (0..pool.len())
                    .filter(|&i| !assigned[i] && self.rules.is_feasible(&load.with(pool[i].order)))
                    .collect();

                if candidates.is_empty() {
                    break;
                }

                if let Some(province) = cursor_province {
                    let same_province: Vec<usize> = candidates
                        .iter()
                        .copied()
                        .filter(|&i| pool[i].order.province.as_deref() == Some(province))
                        .collect();

                    if same_province.is_empty() {
                        debug!("Province {} exhausted, releasing affinity", province);
                        cursor_province = None;
                    } else {
                        candidates = same_province;
                    }
                }

                if self.config.prefer_time_windows {
                    candidates = self.earliest_window_band(&pool, candidates);
                }

                let Some(pick) = self.nearest(&pool, &candidates, &cursor) else {
                    break;
                };

                assigned[pick] = true;
                remaining -= 1;
                load.push(pool[pick].order);
                picks.push(pick);
                cursor = pool[pick].coordinates;
                if cursor_province.is_none() {
                    cursor_province = pool[pick].order.province.as_deref();
                }
            }

            if picks.is_empty() {
                // Nothing fits even an empty trip: drop the nearest order so the loop ends
                let unassigned: Vec<usize> = (0..pool.len()).filter(|&i| !assigned[i]).collect();
                let Some(stuck) = self.nearest(&pool, &unassigned, &cursor) else {
                    break;
                };

                assigned[stuck] = true;
                remaining -= 1;
                let order = pool[stuck].order;
                warn!(
                    "Order '{}' ({:.1} kg) fits no vehicle class, leaving it out",
                    order.name, order.weight_kg
                );
                plan.leftovers.push(LeftoverOrder {
                    order: order.clone(),
                    reason: LeftoverReason::NoVehicleFits,
                });
                continue;
            }

            let trip_orders: Vec<Order> = picks.iter().map(|&i| pool[i].order.clone()).collect();
            let vehicle = self.rules.classify(&trip_orders).cloned();
            let id = plan.trips.len() as u32 + 1;

            match &vehicle {
                Some(class) => debug!(
                    "Trip {} closed: {} drops, {:.1} kg on {}",
                    id,
                    trip_orders.len(),
                    load.weight_kg(),
                    class.label
                ),
                None => warn!("Trip {} matches no vehicle class, flagging as oversized", id),
            }

            plan.trips.push(Trip::new(id, trip_orders, vehicle));
        }

        info!(
            "Built {} trips with {} leftovers from {} orders",
            plan.trips.len(),
            plan.leftovers.len(),
            orders.len()
        );

        plan
    }

    /// Keep candidates whose window starts within the tolerance of the earliest
    /// scheduled candidate, plus candidates without a window
    fn earliest_window_band(&self, pool: &[Candidate<'_>], candidates: Vec<usize>) -> Vec<usize> {
        let earliest = candidates
            .iter()
            .filter_map(|&i| pool[i].order.time_window.map(|w| w.start))
            .min();

        let Some(earliest) = earliest else {
            return candidates;
        };
        let limit = earliest.saturating_add(self.config.time_window_tolerance_minutes);

        candidates
            .into_iter()
            .filter(|&i| pool[i].order.time_window.map_or(true, |w| w.start <= limit))
            .collect()
    }

    /// Nearest candidate to `cursor`; candidates within epsilon of the nearest
    /// distance are ordered by name, then by source order
    fn nearest(&self, pool: &[Candidate<'_>], candidates: &[usize], cursor: &Coordinates) -> Option<usize> {
        let distances: Vec<(usize, f64)> = candidates
            .iter()
            .map(|&i| (i, haversine_distance(cursor, &pool[i].coordinates)))
            .collect();

        let best = distances
            .iter()
            .map(|&(_, d)| d)
            .fold(f64::INFINITY, f64::min);

        distances
            .into_iter()
            .filter(|&(_, d)| d - best < self.config.tie_epsilon_km)
            .min_by(|&(a, _), &(b, _)| {
                pool[a]
                    .order
                    .name
                    .cmp(&pool[b].order.name)
                    .then(a.cmp(&b))
            })
            .map(|(i, _)| i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Channel, ChannelRule, TimeWindow, VehicleClass};

    fn depot() -> Coordinates {
        Coordinates { lat: 13.7563, lng: 100.5018 }
    }

    fn order(id: u32, name: &str, weight_kg: f64, province: &str, lat: f64, lng: f64) -> Order {
        Order {
            id,
            name: name.to_string(),
            address: format!("{} {}", name, province),
            region: String::new(),
            province: if province.is_empty() { None } else { Some(province.to_string()) },
            district: String::new(),
            channel: Channel::general(),
            weight_kg,
            cases: 1,
            location: Location::Resolved(Coordinates { lat, lng }),
            time_window: None,
        }
    }

    fn small_medium() -> VehicleRules {
        VehicleRules::new(vec![
            VehicleClass::new("S", 3000.0, 5),
            VehicleClass::new("M", 6000.0, 3),
        ])
        .unwrap()
    }

    fn names(trip: &Trip) -> Vec<&str> {
        trip.orders.iter().map(|o| o.name.as_str()).collect()
    }

    /// Deterministic pseudo-random orders spread around the depot
    fn scattered_orders(count: u32) -> Vec<Order> {
        let provinces = ["Bangkok", "Nonthaburi", "Pathum Thani", "Samut Prakan"];
        let mut seed: u64 = 42;
        let mut next = move || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (seed >> 33) as f64 / (1u64 << 31) as f64
        };

        (1..=count)
            .map(|id| {
                let mut o = order(
                    id,
                    &format!("Customer {:03}", id),
                    50.0 + next() * 2500.0,
                    provinces[(next() * 4.0) as usize % 4],
                    13.5 + next() * 0.6,
                    100.3 + next() * 0.6,
                );
                o.cases = (next() * 40.0) as u32;
                if id % 7 == 0 {
                    o.channel = Channel::new("MAKRO");
                }
                if id % 5 == 0 {
                    o.channel = Channel::new("CVS");
                }
                o
            })
            .collect()
    }

    #[test]
    fn test_two_light_orders_share_small_vehicle() {
        let rules = small_medium();
        let builder = TripBuilder::new(&rules, BuildConfig::default());
        let orders = vec![
            order(1, "X", 1000.0, "Bangkok", 13.80, 100.55),
            order(2, "Y", 1200.0, "Bangkok", 13.82, 100.56),
        ];

        let plan = builder.build(&orders, depot());

        assert_eq!(plan.trips.len(), 1);
        assert!(plan.leftovers.is_empty());
        assert_eq!(plan.trips[0].vehicle_label(), "S");
        assert_eq!(names(&plan.trips[0]), vec!["X", "Y"]);
        assert!((plan.trips[0].total_weight_kg - 2200.0).abs() < 1e-9);
    }

    #[test]
    fn test_order_heavier_than_every_class_is_leftover() {
        let rules = VehicleRules::new(vec![
            VehicleClass::new("S", 3000.0, 5),
            VehicleClass::new("L", 13000.0, 4),
        ])
        .unwrap();
        let builder = TripBuilder::new(&rules, BuildConfig::default());
        let orders = vec![order(1, "Z", 14000.0, "Bangkok", 13.80, 100.55)];

        let plan = builder.build(&orders, depot());

        assert!(plan.trips.is_empty());
        assert_eq!(plan.leftovers.len(), 1);
        assert_eq!(plan.leftovers[0].order.name, "Z");
        assert_eq!(plan.leftovers[0].reason, LeftoverReason::NoVehicleFits);
    }

    #[test]
    fn test_huge_case_counts_do_not_overflow() {
        let rules = VehicleRules::new(vec![
            VehicleClass {
                max_cases: Some(500),
                ..VehicleClass::new("S", 3000.0, 5)
            },
            VehicleClass::new("M", 6000.0, 5),
        ])
        .unwrap();
        let builder = TripBuilder::new(&rules, BuildConfig::default());
        let mut a = order(1, "A", 100.0, "Bangkok", 13.80, 100.55);
        a.cases = u32::MAX;
        let mut b = order(2, "B", 100.0, "Bangkok", 13.81, 100.55);
        b.cases = u32::MAX;

        let plan = builder.build(&[a, b], depot());

        assert_eq!(plan.trips.len(), 1);
        assert_eq!(plan.trips[0].vehicle_label(), "M");
        assert_eq!(plan.trips[0].total_cases, u32::MAX);
        assert!(plan.leftovers.is_empty());
    }

    #[test]
    fn test_stuck_order_does_not_block_others() {
        let rules = small_medium();
        let builder = TripBuilder::new(&rules, BuildConfig::default());
        let orders = vec![
            order(1, "Huge", 9000.0, "Bangkok", 13.76, 100.50),
            order(2, "Small", 100.0, "Bangkok", 13.90, 100.60),
        ];

        let plan = builder.build(&orders, depot());

        assert_eq!(plan.trips.len(), 1);
        assert_eq!(names(&plan.trips[0]), vec!["Small"]);
        assert_eq!(plan.leftovers.len(), 1);
        assert_eq!(plan.leftovers[0].order.name, "Huge");
    }

    #[test]
    fn test_unresolved_and_failed_locations_are_leftovers() {
        let rules = small_medium();
        let builder = TripBuilder::new(&rules, BuildConfig::default());
        let mut pending = order(1, "Pending", 10.0, "Bangkok", 0.0, 0.0);
        pending.location = Location::Unresolved;
        let mut failed = order(2, "Failed", 10.0, "Bangkok", 0.0, 0.0);
        failed.location = Location::Failed;
        let ok = order(3, "Ok", 10.0, "Bangkok", 13.8, 100.5);

        let plan = builder.build(&[pending, failed, ok], depot());

        assert_eq!(plan.trips.len(), 1);
        let reasons: Vec<(&str, LeftoverReason)> = plan
            .leftovers
            .iter()
            .map(|l| (l.order.name.as_str(), l.reason))
            .collect();
        assert_eq!(
            reasons,
            vec![
                ("Pending", LeftoverReason::LocationUnresolved),
                ("Failed", LeftoverReason::GeocodingFailed),
            ]
        );
    }

    #[test]
    fn test_equidistant_candidates_are_taken_by_name() {
        let rules = small_medium();
        let builder = TripBuilder::new(&rules, BuildConfig::default());
        let d = depot();
        // Mirror images across the depot's meridian: equal distance
        let orders = vec![
            order(1, "Beta", 10.0, "Bangkok", d.lat + 0.05, d.lng + 0.05),
            order(2, "Alpha", 10.0, "Bangkok", d.lat + 0.05, d.lng - 0.05),
        ];

        let plan = builder.build(&orders, d);

        assert_eq!(names(&plan.trips[0])[0], "Alpha");
    }

    #[test]
    fn test_nearest_candidate_wins_outside_epsilon() {
        let rules = small_medium();
        let builder = TripBuilder::new(&rules, BuildConfig::default());
        let d = depot();
        let orders = vec![
            order(1, "Alpha", 10.0, "Bangkok", d.lat + 0.20, d.lng),
            order(2, "Zulu", 10.0, "Bangkok", d.lat + 0.01, d.lng),
        ];

        let plan = builder.build(&orders, d);

        assert_eq!(names(&plan.trips[0]), vec!["Zulu", "Alpha"]);
    }

    #[test]
    fn test_province_affinity_keeps_trip_in_province() {
        let rules = small_medium();
        let builder = TripBuilder::new(&rules, BuildConfig::default());
        let d = depot();
        let orders = vec![
            order(1, "A", 10.0, "Bangkok", d.lat + 0.01, d.lng),
            // closer to A than C is, but in another province
            order(2, "B", 10.0, "Nonthaburi", d.lat + 0.03, d.lng),
            order(3, "C", 10.0, "Bangkok", d.lat + 0.15, d.lng),
        ];

        let plan = builder.build(&orders, d);

        assert_eq!(plan.trips.len(), 1);
        assert_eq!(names(&plan.trips[0]), vec!["A", "C", "B"]);
    }

    #[test]
    fn test_released_affinity_moves_to_new_province() {
        let rules = small_medium();
        let builder = TripBuilder::new(&rules, BuildConfig::default());
        let d = depot();
        let orders = vec![
            order(1, "A", 10.0, "Bangkok", d.lat + 0.01, d.lng),
            order(2, "B", 10.0, "Nonthaburi", d.lat + 0.05, d.lng),
            order(3, "C", 10.0, "Pathum Thani", d.lat + 0.06, d.lng),
            order(4, "D", 10.0, "Nonthaburi", d.lat + 0.20, d.lng),
        ];

        let plan = builder.build(&orders, d);

        // After Bangkok runs out, B sets Nonthaburi and D is preferred over nearer C
        assert_eq!(names(&plan.trips[0]), vec!["A", "B", "D", "C"]);
    }

    #[test]
    fn test_max_stops_splits_trips() {
        let rules = small_medium();
        let config = BuildConfig { max_stops: 2, ..Default::default() };
        let builder = TripBuilder::new(&rules, config);
        let d = depot();
        let orders: Vec<Order> = (1..=5)
            .map(|i| order(i, &format!("O{}", i), 10.0, "Bangkok", d.lat + 0.01 * i as f64, d.lng))
            .collect();

        let plan = builder.build(&orders, d);

        assert_eq!(plan.trips.len(), 3);
        assert!(plan.trips.iter().all(|t| t.drops() <= 2));
        assert_eq!(names(&plan.trips[0]), vec!["O1", "O2"]);
        assert_eq!(names(&plan.trips[2]), vec!["O5"]);
    }

    #[test]
    fn test_zero_max_stops_is_clamped() {
        let config = BuildConfig { max_stops: 0, ..Default::default() };
        assert_eq!(config.effective_max_stops(), 1);
        let config = BuildConfig { max_stops: 100, ..Default::default() };
        assert_eq!(config.effective_max_stops(), MAX_ROUTING_WAYPOINTS);
    }

    #[test]
    fn test_time_window_preference_serves_earlier_window_first() {
        let rules = small_medium();
        let d = depot();
        let mut near = order(1, "Near", 10.0, "Bangkok", d.lat + 0.01, d.lng);
        near.time_window = TimeWindow::new(14 * 60, 16 * 60);
        let mut far = order(2, "Far", 10.0, "Bangkok", d.lat + 0.20, d.lng);
        far.time_window = TimeWindow::new(8 * 60, 10 * 60);
        let orders = vec![near, far];

        let plain = TripBuilder::new(&rules, BuildConfig::default()).build(&orders, d);
        assert_eq!(names(&plain.trips[0]), vec!["Near", "Far"]);

        let config = BuildConfig { prefer_time_windows: true, ..Default::default() };
        let timed = TripBuilder::new(&rules, config).build(&orders, d);
        assert_eq!(names(&timed.trips[0]), vec!["Far", "Near"]);
    }

    #[test]
    fn test_time_windows_within_tolerance_fall_back_to_distance() {
        let rules = small_medium();
        let d = depot();
        let mut near = order(1, "Near", 10.0, "Bangkok", d.lat + 0.01, d.lng);
        near.time_window = TimeWindow::new(9 * 60, 11 * 60);
        let mut far = order(2, "Far", 10.0, "Bangkok", d.lat + 0.20, d.lng);
        far.time_window = TimeWindow::new(8 * 60 + 30, 10 * 60);

        let config = BuildConfig { prefer_time_windows: true, ..Default::default() };
        let plan = TripBuilder::new(&rules, config).build(&[near, far], d);

        assert_eq!(names(&plan.trips[0]), vec!["Near", "Far"]);
    }

    #[test]
    fn test_partition_is_total_and_disjoint() {
        let rules = VehicleRules::default_table(&Channel::new("MAKRO"), &Channel::new("CVS"));
        let builder = TripBuilder::new(&rules, BuildConfig::default());
        let mut orders = scattered_orders(120);
        orders.push(order(500, "Too heavy", 20000.0, "Bangkok", 13.7, 100.5));

        let plan = builder.build(&orders, depot());

        let mut seen: Vec<u32> = plan
            .trips
            .iter()
            .flat_map(|t| t.orders.iter().map(|o| o.id))
            .chain(plan.leftovers.iter().map(|l| l.order.id))
            .collect();
        seen.sort_unstable();
        let mut expected: Vec<u32> = orders.iter().map(|o| o.id).collect();
        expected.sort_unstable();

        assert_eq!(seen, expected);
        assert!(plan.leftovers.iter().any(|l| l.order.id == 500));
    }

    #[test]
    fn test_every_trip_respects_its_vehicle_class() {
        let rules = VehicleRules::default_table(&Channel::new("MAKRO"), &Channel::new("CVS"));
        let builder = TripBuilder::new(&rules, BuildConfig::default());
        let orders = scattered_orders(150);

        let plan = builder.build(&orders, depot());

        assert!(!plan.trips.is_empty());
        for trip in &plan.trips {
            let class = trip.vehicle.as_ref().expect("greedy trips are always classifiable");
            let load = LoadProfile::from_orders(&trip.orders);

            assert!(trip.total_weight_kg <= class.max_weight_kg + 0.005, "trip {} overweight", trip.id);
            assert!(
                trip.drops() as u32 <= VehicleRules::effective_max_drops(class, &load),
                "trip {} has too many drops for {}",
                trip.id,
                class.label
            );
            if let ChannelRule::AllShare(channel) = &class.channel_rule {
                assert!(trip.orders.iter().all(|o| &o.channel == channel));
            }
            assert!(trip.drops() <= DEFAULT_MAX_STOPS);
        }
    }

    #[test]
    fn test_build_is_deterministic() {
        let rules = VehicleRules::default_table(&Channel::new("MAKRO"), &Channel::new("CVS"));
        let builder = TripBuilder::new(&rules, BuildConfig::default());
        let orders = scattered_orders(80);

        let first = builder.build(&orders, depot());
        let second = builder.build(&orders, depot());

        assert_eq!(first, second);
    }
}
