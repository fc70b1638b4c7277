//! Plan export: trip stop sheet, leftover sheet and map render JSON

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::services::planner::PlanReport;
use crate::types::{LeftoverOrder, SequencedTrip};

/// Route colors, cycled by trip index
pub const ROUTE_COLORS: [&str; 10] = [
    "#0088FF", "#FF0000", "#00FF00", "#9900FF", "#FF8800", "#00FFFF", "#FF00FF", "#FFFF00", "#000000",
    "#888888",
];

pub fn route_color(trip_index: usize) -> &'static str {
    ROUTE_COLORS[trip_index % ROUTE_COLORS.len()]
}

#[derive(Debug, Serialize)]
struct TripStopRow<'a> {
    trip_id: u32,
    vehicle: &'a str,
    sequence: usize,
    customer: &'a str,
    address: &'a str,
    district: &'a str,
    province: &'a str,
    channel: &'a str,
    weight_kg: String,
    cases: u32,
    leg_distance_km: Option<String>,
    load_factor: Option<String>,
    trip_distance_km: Option<String>,
    routing_status: &'a str,
}

#[derive(Debug, Serialize)]
struct LeftoverRow<'a> {
    customer: &'a str,
    address: &'a str,
    district: &'a str,
    province: &'a str,
    channel: &'a str,
    weight_kg: String,
    cases: u32,
    reason: &'a str,
}

/// Map-ready view of one trip
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderTrip {
    pub trip_id: u32,
    pub color: &'static str,
    pub vehicle: String,
    /// `[lng, lat]` in stop order
    pub stops: Vec<[f64; 2]>,
    pub geometry: Vec<[f64; 2]>,
    pub distance_km: Option<f64>,
    pub duration_minutes: Option<f64>,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RenderDocument {
    date: String,
    depot: [f64; 2],
    trips: Vec<RenderTrip>,
}

const TRIP_PLAN_HEADER: [&str; 14] = [
    "trip_id",
    "vehicle",
    "sequence",
    "customer",
    "address",
    "district",
    "province",
    "channel",
    "weight_kg",
    "cases",
    "leg_distance_km",
    "load_factor",
    "trip_distance_km",
    "routing_status",
];

const LEFTOVER_HEADER: [&str; 8] = [
    "customer", "address", "district", "province", "channel", "weight_kg", "cases", "reason",
];

/// Header written up front so empty sheets still carry one
fn sheet_writer<W: Write>(writer: W, header: &[&str]) -> csv::Result<csv::Writer<W>> {
    let mut csv = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
    csv.write_record(header)?;
    Ok(csv)
}

fn two_decimals(value: f64) -> String {
    format!("{:.2}", value)
}

/// One row per (trip, stop), stops in sequenced order
pub fn write_trip_plan<W: Write>(writer: W, trips: &[SequencedTrip]) -> csv::Result<()> {
    let mut csv = sheet_writer(writer, &TRIP_PLAN_HEADER)?;

    for trip in trips {
        let load_factor = trip.trip.load_factor().map(two_decimals);
        let trip_distance_km = trip.total_distance_km().map(two_decimals);

        for (index, stop) in trip.stops.iter().enumerate() {
            csv.serialize(TripStopRow {
                trip_id: trip.trip.id,
                vehicle: trip.trip.vehicle_label(),
                sequence: index + 1,
                customer: &stop.name,
                address: &stop.address,
                district: &stop.district,
                province: stop.province.as_deref().unwrap_or_default(),
                channel: stop.channel.as_str(),
                weight_kg: two_decimals(stop.weight_kg),
                cases: stop.cases,
                leg_distance_km: trip.leg_distance_km(index).map(two_decimals),
                load_factor: load_factor.clone(),
                trip_distance_km: trip_distance_km.clone(),
                routing_status: trip.status.as_str(),
            })?;
        }
    }

    csv.flush()?;
    Ok(())
}

pub fn write_leftovers<W: Write>(writer: W, leftovers: &[LeftoverOrder]) -> csv::Result<()> {
    let mut csv = sheet_writer(writer, &LEFTOVER_HEADER)?;

    for leftover in leftovers {
        let order = &leftover.order;
        csv.serialize(LeftoverRow {
            customer: &order.name,
            address: &order.address,
            district: &order.district,
            province: order.province.as_deref().unwrap_or_default(),
            channel: order.channel.as_str(),
            weight_kg: two_decimals(order.weight_kg),
            cases: order.cases,
            reason: leftover.reason.as_str(),
        })?;
    }

    csv.flush()?;
    Ok(())
}

pub fn render_trips(trips: &[SequencedTrip]) -> Vec<RenderTrip> {
    trips
        .iter()
        .enumerate()
        .map(|(index, trip)| RenderTrip {
            trip_id: trip.trip.id,
            color: route_color(index),
            vehicle: trip.trip.vehicle_label().to_string(),
            stops: trip.stop_coordinates().iter().map(|c| [c.lng, c.lat]).collect(),
            geometry: trip.geometry.clone(),
            distance_km: trip.total_distance_km(),
            duration_minutes: trip.total_duration_minutes(),
            status: trip.status.as_str(),
        })
        .collect()
}

/// Keep dates like `01/05/2024` usable in file names
fn file_stem(date: &str) -> String {
    date.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect()
}

/// Written output locations
#[derive(Debug, Clone)]
pub struct PlanFiles {
    pub trip_plan: PathBuf,
    pub leftovers: PathBuf,
    pub render: PathBuf,
}

/// Write `trip_plan_<date>.csv`, `leftovers_<date>.csv` and `trips_<date>.json` into `dir`
pub fn write_plan_files(dir: &Path, date: &str, report: &PlanReport) -> Result<PlanFiles> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

    let stem = file_stem(date);
    let files = PlanFiles {
        trip_plan: dir.join(format!("trip_plan_{}.csv", stem)),
        leftovers: dir.join(format!("leftovers_{}.csv", stem)),
        render: dir.join(format!("trips_{}.json", stem)),
    };

    let create = |path: &Path| -> Result<BufWriter<File>> {
        let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
        Ok(BufWriter::new(file))
    };

    write_trip_plan(create(&files.trip_plan)?, &report.trips)
        .with_context(|| format!("Failed to write {}", files.trip_plan.display()))?;
    write_leftovers(create(&files.leftovers)?, &report.leftovers)
        .with_context(|| format!("Failed to write {}", files.leftovers.display()))?;

    let document = RenderDocument {
        date: date.to_string(),
        depot: [report.depot.lng, report.depot.lat],
        trips: render_trips(&report.trips),
    };
    let mut render = create(&files.render)?;
    serde_json::to_writer_pretty(&mut render, &document)
        .with_context(|| format!("Failed to write {}", files.render.display()))?;
    render.flush()?;

    info!(
        "Wrote {}, {} and {}",
        files.trip_plan.display(),
        files.leftovers.display(),
        files.render.display()
    );
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::planner::PlanStats;
    use crate::types::{
        Channel, Coordinates, Leg, LeftoverReason, Location, Order, RoutingStatus, Trip, VehicleClass,
    };

    fn order(id: u32, name: &str, weight_kg: f64) -> Order {
        Order {
            id,
            name: name.to_string(),
            address: format!("{}, Bang Rak", name),
            region: "Central".to_string(),
            province: Some("Bangkok".to_string()),
            district: "Bang Rak".to_string(),
            channel: Channel::new("CVS"),
            weight_kg,
            cases: 4,
            location: Location::Resolved(Coordinates { lat: 13.72 + id as f64 * 0.01, lng: 100.52 }),
            time_window: None,
        }
    }

    fn routed_trip() -> SequencedTrip {
        let trip = Trip::new(
            1,
            vec![order(1, "Shop A", 1000.0), order(2, "Shop B", 500.0)],
            Some(VehicleClass::new("4W", 3000.0, 12)),
        );
        SequencedTrip {
            stops: vec![trip.orders[1].clone(), trip.orders[0].clone()],
            trip,
            legs: vec![
                Leg { distance_meters: 5_000, duration_seconds: 600 },
                Leg { distance_meters: 2_500, duration_seconds: 300 },
                Leg { distance_meters: 7_500, duration_seconds: 900 },
            ],
            status: RoutingStatus::Routed,
            geometry: vec![[100.52, 13.73], [100.52, 13.74]],
        }
    }

    fn failed_trip() -> SequencedTrip {
        let trip = Trip::new(2, vec![order(3, "Shop C", 200.0)], None);
        SequencedTrip::unrouted(trip, RoutingStatus::Unavailable("timeout".to_string()))
    }

    #[test]
    fn test_trip_plan_rows() {
        let mut out = Vec::new();
        write_trip_plan(&mut out, &[routed_trip(), failed_trip()]).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(
            lines[0],
            "trip_id,vehicle,sequence,customer,address,district,province,channel,weight_kg,cases,\
             leg_distance_km,load_factor,trip_distance_km,routing_status"
        );
        assert_eq!(
            lines[1],
            "1,4W,1,Shop B,\"Shop B, Bang Rak\",Bang Rak,Bangkok,CVS,500.00,4,5.00,0.50,15.00,routed"
        );
        assert_eq!(
            lines[2],
            "1,4W,2,Shop A,\"Shop A, Bang Rak\",Bang Rak,Bangkok,CVS,1000.00,4,2.50,0.50,15.00,routed"
        );
        assert_eq!(
            lines[3],
            "2,OVERSIZED,1,Shop C,\"Shop C, Bang Rak\",Bang Rak,Bangkok,CVS,200.00,4,,,,unavailable"
        );
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn test_leftover_rows() {
        let leftovers = vec![LeftoverOrder {
            order: order(9, "Warehouse", 14_000.0),
            reason: LeftoverReason::NoVehicleFits,
        }];

        let mut out = Vec::new();
        write_leftovers(&mut out, &leftovers).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "customer,address,district,province,channel,weight_kg,cases,reason");
        assert!(lines[1].starts_with("Warehouse,\"Warehouse, Bang Rak\",Bang Rak,Bangkok,CVS,14000.00,4,"));
        assert!(lines[1].ends_with(LeftoverReason::NoVehicleFits.as_str()));
    }

    #[test]
    fn test_render_trips_cycle_colors() {
        let trips: Vec<SequencedTrip> = (0..12)
            .map(|i| {
                let mut trip = routed_trip();
                trip.trip.id = i + 1;
                trip
            })
            .collect();

        let rendered = render_trips(&trips);

        assert_eq!(rendered[0].color, "#0088FF");
        assert_eq!(rendered[9].color, "#888888");
        assert_eq!(rendered[10].color, "#0088FF");
        assert_eq!(rendered[0].stops[0], [100.52, 13.74]);
        assert_eq!(rendered[0].distance_km, Some(15.0));
        assert_eq!(rendered[0].duration_minutes, Some(30.0));
    }

    #[test]
    fn test_render_unrouted_trip() {
        let rendered = render_trips(&[failed_trip()]);
        assert_eq!(rendered[0].vehicle, "OVERSIZED");
        assert!(rendered[0].geometry.is_empty());
        assert!(rendered[0].distance_km.is_none());
        assert_eq!(rendered[0].status, "unavailable");
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("2024-05-01"), "2024-05-01");
        assert_eq!(file_stem("01/05/2024"), "01-05-2024");
    }

    #[test]
    fn test_write_plan_files() {
        let dir = std::env::temp_dir().join(format!("trip-planner-export-{}", std::process::id()));
        let report = PlanReport {
            depot: Coordinates { lat: 13.7563, lng: 100.5018 },
            trips: vec![routed_trip()],
            leftovers: vec![],
            stats: PlanStats::default(),
        };

        let files = write_plan_files(&dir, "01/05/2024", &report).unwrap();

        assert!(files.trip_plan.ends_with("trip_plan_01-05-2024.csv"));
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&files.render).unwrap()).unwrap();
        assert_eq!(json["date"], "01/05/2024");
        assert_eq!(json["trips"][0]["color"], "#0088FF");
        assert_eq!(json["trips"][0]["tripId"], 1);
        let leftovers = std::fs::read_to_string(&files.leftovers).unwrap();
        assert_eq!(leftovers.lines().count(), 1, "header only");

        std::fs::remove_dir_all(&dir).ok();
    }
}
