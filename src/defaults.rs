use crate::types::Coordinates;

pub const DEFAULT_MAX_STOPS: usize = 20;

/// Waypoint ceiling of a single routing request
pub const MAX_ROUTING_WAYPOINTS: usize = 23;

/// Candidates closer than this to the best distance are ordered by name
pub const TIE_EPSILON_KM: f64 = 0.1;

pub const TIME_WINDOW_TOLERANCE_MINUTES: u16 = 60;

pub const GEOCODE_INTERVAL_MS: u64 = 300;

pub const ROUTING_INTERVAL_MS: u64 = 400;

pub const DEFAULT_DEPOT_ADDRESS: &str = "บริษัท อำพลฟูดส์ โพรเซสซิ่ง จำกัด";

pub const DEFAULT_RETAIL_CHANNEL: &str = "MAKRO";

pub const DEFAULT_STRICT_CHANNEL: &str = "CVS";

/// Used when the depot address cannot be geocoded
pub fn fallback_depot() -> Coordinates {
    Coordinates { lat: 13.7563, lng: 100.5018 }
}
