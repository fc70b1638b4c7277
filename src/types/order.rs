//! Order types

use serde::{Deserialize, Serialize};

/// Channel tag used when a row carries no recognized tag
pub const GENERAL_CHANNEL: &str = "GENERAL";

/// Coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

/// Geocoding state of an order's address.
///
/// `Unresolved` means no attempt was made yet, `Failed` means the geocoder was
/// asked and could not place the address.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum Location {
    Unresolved,
    Resolved(Coordinates),
    Failed,
}

impl Location {
    pub fn coordinates(&self) -> Option<Coordinates> {
        match self {
            Location::Resolved(coords) => Some(*coords),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Location::Resolved(_))
    }
}

/// Categorical order channel (e.g. large-format retail, strict handling)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Channel(String);

impl Channel {
    /// Normalized (trimmed, upper case) channel tag
    pub fn new(tag: &str) -> Self {
        Self(tag.trim().to_uppercase())
    }

    pub fn general() -> Self {
        Self(GENERAL_CHANNEL.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self::general()
    }
}

impl From<String> for Channel {
    fn from(tag: String) -> Self {
        Self::new(&tag)
    }
}

impl From<Channel> for String {
    fn from(channel: Channel) -> Self {
        channel.0
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Scheduled delivery window, in minutes of the day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeWindow {
    pub start: u16,
    pub end: u16,
}

impl TimeWindow {
    pub const LAST_MINUTE: u16 = 24 * 60 - 1;

    /// Returns `None` when the bounds are out of range or reversed.
    pub fn new(start: u16, end: u16) -> Option<Self> {
        if start > end || end > Self::LAST_MINUTE {
            return None;
        }
        Some(Self { start, end })
    }
}

/// A validated delivery order for one planning run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Source row number (1-based, header excluded)
    pub id: u32,
    pub name: String,
    pub address: String,
    pub region: String,
    /// `None` when the source left the province blank
    pub province: Option<String>,
    pub district: String,
    pub channel: Channel,
    pub weight_kg: f64,
    pub cases: u32,
    pub location: Location,
    pub time_window: Option<TimeWindow>,
}

impl Order {
    pub fn coordinates(&self) -> Option<Coordinates> {
        self.location.coordinates()
    }
}
