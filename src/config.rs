//! Configuration management

use std::path::PathBuf;

use anyhow::{self, Context, Result};

use crate::defaults::{
    DEFAULT_DEPOT_ADDRESS, DEFAULT_MAX_STOPS, DEFAULT_RETAIL_CHANNEL, DEFAULT_STRICT_CHANNEL,
    GEOCODE_INTERVAL_MS, ROUTING_INTERVAL_MS, TIME_WINDOW_TOLERANCE_MINUTES,
};
use crate::types::{Channel, Coordinates};

/// Geocoder backend settings
#[derive(Debug, Clone)]
pub struct GeocoderConfig {
    /// "mock" or "nominatim"
    pub backend: String,

    /// Nominatim API URL
    pub nominatim_url: String,

    /// Comma-separated ISO country codes passed to Nominatim search
    pub country_codes: String,

    /// Nominatim client's own request floor
    pub rate_limit_ms: u64,

    pub cb_threshold: u32,
    pub cb_recovery_secs: u64,

    /// Pipeline interval between consecutive geocoding calls
    pub interval_ms: u64,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            backend: "mock".to_string(),
            nominatim_url: "https://nominatim.openstreetmap.org".to_string(),
            country_codes: "th".to_string(),
            rate_limit_ms: 1500,
            cb_threshold: 3,
            cb_recovery_secs: 300,
            interval_ms: GEOCODE_INTERVAL_MS,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Depot address, geocoded when no coordinates are configured
    pub depot_address: String,

    /// Explicit depot coordinates (DEPOT_LAT + DEPOT_LNG)
    pub depot_coordinates: Option<Coordinates>,

    pub geocoder: GeocoderConfig,

    /// Valhalla routing engine URL (optional, falls back to mock if unavailable)
    pub valhalla_url: Option<String>,

    pub routing_interval_ms: u64,

    /// Return to the depot after the last stop
    pub round_trip: bool,

    pub max_stops: usize,

    /// JSON vehicle class table; the built-in table is used when unset
    pub vehicle_rules_path: Option<PathBuf>,

    /// Recognized channel tags; anything else is treated as general
    pub channel_tags: Vec<Channel>,

    /// Tag required by the large-format retail vehicle class
    pub retail_channel: Channel,

    /// Tag that tightens the drop ceiling of the small classes
    pub strict_channel: Channel,

    pub prefer_time_windows: bool,
    pub time_window_tolerance_minutes: u16,

    pub logs_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        let retail_channel = Channel::new(DEFAULT_RETAIL_CHANNEL);
        let strict_channel = Channel::new(DEFAULT_STRICT_CHANNEL);
        Self {
            depot_address: DEFAULT_DEPOT_ADDRESS.to_string(),
            depot_coordinates: None,
            geocoder: GeocoderConfig::default(),
            valhalla_url: None,
            routing_interval_ms: ROUTING_INTERVAL_MS,
            round_trip: true,
            max_stops: DEFAULT_MAX_STOPS,
            vehicle_rules_path: None,
            channel_tags: vec![retail_channel.clone(), strict_channel.clone()],
            retail_channel,
            strict_channel,
            prefer_time_windows: false,
            time_window_tolerance_minutes: TIME_WINDOW_TOLERANCE_MINUTES,
            logs_dir: "./logs".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from any key lookup; unset keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(address) = var("DEPOT_ADDRESS") {
            config.depot_address = address;
        }

        config.depot_coordinates = match (var("DEPOT_LAT"), var("DEPOT_LNG")) {
            (Some(lat), Some(lng)) => {
                let lat: f64 = lat.parse().context("DEPOT_LAT must be a number")?;
                let lng: f64 = lng.parse().context("DEPOT_LNG must be a number")?;
                if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
                    anyhow::bail!("DEPOT_LAT/DEPOT_LNG out of range: {}, {}", lat, lng);
                }
                Some(Coordinates { lat, lng })
            }
            (None, None) => None,
            _ => anyhow::bail!("DEPOT_LAT and DEPOT_LNG must be set together"),
        };

        if let Some(backend) = var("GEOCODER_BACKEND") {
            config.geocoder.backend = backend.to_lowercase();
        }
        if let Some(url) = var("NOMINATIM_URL") {
            config.geocoder.nominatim_url = url.trim_end_matches('/').to_string();
        }
        if let Some(codes) = var("NOMINATIM_COUNTRY_CODES") {
            config.geocoder.country_codes = codes;
        }
        if let Some(ms) = var("NOMINATIM_RATE_LIMIT_MS") {
            config.geocoder.rate_limit_ms = ms.parse().context("NOMINATIM_RATE_LIMIT_MS must be an integer")?;
        }
        if let Some(threshold) = var("NOMINATIM_CB_THRESHOLD") {
            config.geocoder.cb_threshold = threshold.parse().context("NOMINATIM_CB_THRESHOLD must be an integer")?;
        }
        if let Some(secs) = var("NOMINATIM_CB_RECOVERY_SECS") {
            config.geocoder.cb_recovery_secs = secs.parse().context("NOMINATIM_CB_RECOVERY_SECS must be an integer")?;
        }
        if let Some(ms) = var("GEOCODE_INTERVAL_MS") {
            config.geocoder.interval_ms = ms.parse().context("GEOCODE_INTERVAL_MS must be an integer")?;
        }

        config.valhalla_url = var("VALHALLA_URL");
        if let Some(ms) = var("ROUTING_INTERVAL_MS") {
            config.routing_interval_ms = ms.parse().context("ROUTING_INTERVAL_MS must be an integer")?;
        }
        if let Some(flag) = var("ROUND_TRIP") {
            config.round_trip = parse_flag(&flag).context("ROUND_TRIP must be true or false")?;
        }

        if let Some(stops) = var("MAX_STOPS") {
            config.max_stops = stops.parse().context("MAX_STOPS must be a positive integer")?;
            if config.max_stops == 0 {
                anyhow::bail!("MAX_STOPS must be at least 1");
            }
        }
        config.vehicle_rules_path = var("VEHICLE_RULES_PATH").map(PathBuf::from);

        if let Some(tag) = var("RETAIL_CHANNEL_TAG") {
            config.retail_channel = Channel::new(&tag);
        }
        if let Some(tag) = var("STRICT_CHANNEL_TAG") {
            config.strict_channel = Channel::new(&tag);
        }
        config.channel_tags = match var("CHANNEL_TAGS") {
            Some(tags) => tags
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(Channel::new)
                .collect(),
            None => vec![config.retail_channel.clone(), config.strict_channel.clone()],
        };

        if let Some(flag) = var("PREFER_TIME_WINDOWS") {
            config.prefer_time_windows = parse_flag(&flag).context("PREFER_TIME_WINDOWS must be true or false")?;
        }
        if let Some(minutes) = var("TIME_WINDOW_TOLERANCE_MINUTES") {
            config.time_window_tolerance_minutes = minutes
                .parse()
                .context("TIME_WINDOW_TOLERANCE_MINUTES must be an integer")?;
        }

        if let Some(dir) = var("LOGS_DIR") {
            config.logs_dir = dir;
        }

        Ok(config)
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("not a boolean: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_config_defaults_when_nothing_is_set() {
        let config = config_from(&[]).unwrap();

        assert_eq!(config.depot_address, DEFAULT_DEPOT_ADDRESS);
        assert!(config.depot_coordinates.is_none());
        assert_eq!(config.geocoder.backend, "mock");
        assert_eq!(config.geocoder.nominatim_url, "https://nominatim.openstreetmap.org");
        assert!(config.valhalla_url.is_none());
        assert!(config.round_trip);
        assert_eq!(config.max_stops, 20);
        assert_eq!(config.channel_tags, vec![Channel::new("MAKRO"), Channel::new("CVS")]);
    }

    #[test]
    fn test_config_valhalla_url_some_when_set() {
        let config = config_from(&[("VALHALLA_URL", "http://localhost:8002")]).unwrap();
        assert_eq!(config.valhalla_url, Some("http://localhost:8002".to_string()));
    }

    #[test]
    fn test_config_nominatim_url_uses_local_when_set() {
        let config = config_from(&[("NOMINATIM_URL", "http://localhost:8080/")]).unwrap();
        assert_eq!(config.geocoder.nominatim_url, "http://localhost:8080");
    }

    #[test]
    fn test_config_depot_coordinates() {
        let config = config_from(&[("DEPOT_LAT", "13.6"), ("DEPOT_LNG", "100.7")]).unwrap();
        assert_eq!(config.depot_coordinates, Some(Coordinates { lat: 13.6, lng: 100.7 }));

        assert!(config_from(&[("DEPOT_LAT", "13.6")]).is_err());
        assert!(config_from(&[("DEPOT_LAT", "113.6"), ("DEPOT_LNG", "100.7")]).is_err());
    }

    #[test]
    fn test_config_channel_tags_follow_overrides() {
        let config = config_from(&[("RETAIL_CHANNEL_TAG", "bigc"), ("STRICT_CHANNEL_TAG", "7-11")]).unwrap();
        assert_eq!(config.channel_tags, vec![Channel::new("BIGC"), Channel::new("7-11")]);

        let config = config_from(&[("CHANNEL_TAGS", "makro, cvs ,, hore")]).unwrap();
        assert_eq!(
            config.channel_tags,
            vec![Channel::new("MAKRO"), Channel::new("CVS"), Channel::new("HORE")]
        );
    }

    #[test]
    fn test_config_flags_and_numbers() {
        let config = config_from(&[
            ("ROUND_TRIP", "false"),
            ("PREFER_TIME_WINDOWS", "yes"),
            ("MAX_STOPS", "12"),
            ("ROUTING_INTERVAL_MS", "0"),
        ])
        .unwrap();
        assert!(!config.round_trip);
        assert!(config.prefer_time_windows);
        assert_eq!(config.max_stops, 12);
        assert_eq!(config.routing_interval_ms, 0);
    }

    #[test]
    fn test_config_rejects_invalid_values() {
        assert!(config_from(&[("MAX_STOPS", "many")]).is_err());
        assert!(config_from(&[("MAX_STOPS", "0")]).is_err());
        assert!(config_from(&[("ROUND_TRIP", "maybe")]).is_err());
    }

    #[test]
    fn test_blank_values_are_ignored() {
        let config = config_from(&[("VALHALLA_URL", "  "), ("MAX_STOPS", "")]).unwrap();
        assert!(config.valhalla_url.is_none());
        assert_eq!(config.max_stops, 20);
    }
}
