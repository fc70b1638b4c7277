//! Geocoding abstraction layer with safety features
//!
//! This module provides a safe geocoding architecture that:
//! - Never risks getting blocked by external services
//! - Uses MockGeocoder for tests (deterministic, no network)
//! - Uses RateLimitedNominatimGeocoder for production (strict rate limiting)
//!
//! Backend selection via `GeocoderConfig::backend`:
//! - "mock" → MockGeocoder (tests, development)
//! - "nominatim" → RateLimitedNominatimGeocoder (production)

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::GeocoderConfig;
use crate::defaults::fallback_depot;
use crate::services::nominatim::NominatimClient;
use crate::services::rate_limiter::RateLimiter;
use crate::types::{Coordinates, Location, Order};

/// Geocoder trait - abstraction for all geocoding implementations
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Geocode a free-text address to coordinates
    /// Returns None if address cannot be geocoded
    async fn geocode(&self, address: &str) -> Result<Option<GeocodingResult>>;

    /// Get the name of this geocoder implementation
    fn name(&self) -> &'static str;
}

/// Result of geocoding operation
#[derive(Debug, Clone)]
pub struct GeocodingResult {
    /// Latitude and longitude
    pub coordinates: Coordinates,
    /// Confidence score 0.0-1.0
    pub confidence: f64,
    /// Display name returned by geocoder
    pub display_name: String,
}

// ==========================================================================
// MockGeocoder Implementation
// ==========================================================================

/// Rectangle that mock coordinates are drawn from
#[derive(Debug, Clone, Copy)]
pub struct GeoBounds {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lng_min: f64,
    pub lng_max: f64,
}

impl GeoBounds {
    /// Central Thailand, around the Bangkok metropolitan region
    pub const CENTRAL_THAILAND: GeoBounds = GeoBounds {
        lat_min: 13.3,
        lat_max: 14.5,
        lng_min: 99.9,
        lng_max: 101.2,
    };
}

/// Mock geocoder for testing - returns deterministic fake coordinates
pub struct MockGeocoder {
    bounds: GeoBounds,
}

impl MockGeocoder {
    pub fn new() -> Self {
        Self::with_bounds(GeoBounds::CENTRAL_THAILAND)
    }

    pub fn with_bounds(bounds: GeoBounds) -> Self {
        Self { bounds }
    }

    /// Generate deterministic coordinates from address hash
    fn hash_to_coordinates(&self, address: &str) -> Coordinates {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        address.trim().to_lowercase().hash(&mut hasher);
        let hash = hasher.finish();

        let lat_range = self.bounds.lat_max - self.bounds.lat_min;
        let lng_range = self.bounds.lng_max - self.bounds.lng_min;

        // Use different parts of the hash for lat and lng
        let lat_normalized = ((hash >> 32) as f64) / (u32::MAX as f64);
        let lng_normalized = ((hash & 0xFFFFFFFF) as f64) / (u32::MAX as f64);

        Coordinates {
            lat: self.bounds.lat_min + (lat_normalized * lat_range),
            lng: self.bounds.lng_min + (lng_normalized * lng_range),
        }
    }
}

impl Default for MockGeocoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Geocoder for MockGeocoder {
    async fn geocode(&self, address: &str) -> Result<Option<GeocodingResult>> {
        if address.trim().is_empty() {
            return Ok(None);
        }

        Ok(Some(GeocodingResult {
            coordinates: self.hash_to_coordinates(address),
            confidence: 0.95,
            display_name: address.trim().to_string(),
        }))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

// ==========================================================================
// CircuitBreaker Implementation
// ==========================================================================

/// Circuit breaker to prevent hammering a failing service
pub struct CircuitBreaker {
    failure_count: AtomicU32,
    threshold: u32,
    last_failure: Mutex<Option<Instant>>,
    recovery_time: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, recovery_time: Duration) -> Self {
        Self {
            failure_count: AtomicU32::new(0),
            threshold: threshold.max(1),
            last_failure: Mutex::new(None),
            recovery_time,
        }
    }

    /// Check if circuit is open (blocking calls)
    pub fn is_open(&self) -> bool {
        if self.failure_count.load(Ordering::Relaxed) < self.threshold {
            return false;
        }
        match *self.last_failure.lock() {
            // Half-open: allow a retry once the recovery time has passed
            Some(last_time) => last_time.elapsed() < self.recovery_time,
            None => true,
        }
    }

    pub fn record_failure(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        *self.last_failure.lock() = Some(Instant::now());
    }

    /// Record a success (resets failure count)
    pub fn record_success(&self) {
        self.failure_count.store(0, Ordering::Relaxed);
    }
}

// ==========================================================================
// RateLimitedNominatimGeocoder Implementation
// ==========================================================================

/// Rate-limited Nominatim geocoder with circuit breaker protection
///
/// This geocoder wraps the NominatimClient with:
/// - Rate limiting: enforces minimum interval between requests
/// - Circuit breaker: stops requests after repeated failures
pub struct RateLimitedNominatimGeocoder {
    client: NominatimClient,
    rate_limiter: RateLimiter,
    pub(crate) circuit_breaker: CircuitBreaker,
}

impl RateLimitedNominatimGeocoder {
    pub fn with_config(
        base_url: &str,
        country_codes: &str,
        rate_limit_interval: Duration,
        circuit_breaker_threshold: u32,
        circuit_breaker_recovery: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: NominatimClient::new(base_url, country_codes)?,
            rate_limiter: RateLimiter::new(rate_limit_interval),
            circuit_breaker: CircuitBreaker::new(circuit_breaker_threshold, circuit_breaker_recovery),
        })
    }

    pub fn from_config(config: &GeocoderConfig) -> Result<Self> {
        Self::with_config(
            &config.nominatim_url,
            &config.country_codes,
            Duration::from_millis(config.rate_limit_ms),
            config.cb_threshold,
            Duration::from_secs(config.cb_recovery_secs),
        )
    }
}

#[async_trait]
impl Geocoder for RateLimitedNominatimGeocoder {
    async fn geocode(&self, address: &str) -> Result<Option<GeocodingResult>> {
        if self.circuit_breaker.is_open() {
            warn!("Circuit breaker is open, rejecting geocoding request");
            return Err(anyhow::anyhow!("Geocoding service temporarily unavailable (circuit breaker open)"));
        }

        self.rate_limiter.wait().await;

        match self.client.search(address).await {
            Ok(Some(hit)) => {
                self.circuit_breaker.record_success();
                Ok(Some(GeocodingResult {
                    coordinates: hit.coordinates,
                    // Nominatim importance is the closest thing to a confidence
                    confidence: hit.importance.unwrap_or(0.8).clamp(0.0, 1.0),
                    display_name: hit.display_name,
                }))
            }
            Ok(None) => {
                // No result found is not a failure
                self.circuit_breaker.record_success();
                Ok(None)
            }
            Err(e) => {
                self.circuit_breaker.record_failure();
                error!("Geocoding failed: {}", e);
                Err(e)
            }
        }
    }

    fn name(&self) -> &'static str {
        "nominatim"
    }
}

// ==========================================================================
// Factory function
// ==========================================================================

/// Create geocoder based on the configured backend ("mock" or "nominatim")
pub fn create_geocoder(config: &GeocoderConfig) -> Result<Box<dyn Geocoder>> {
    match config.backend.as_str() {
        "mock" => {
            info!("Using MockGeocoder");
            Ok(Box::new(MockGeocoder::new()))
        }
        "nominatim" => {
            info!("Using RateLimitedNominatimGeocoder at {}", config.nominatim_url);
            Ok(Box::new(RateLimitedNominatimGeocoder::from_config(config)?))
        }
        other => {
            warn!("Unknown geocoder backend '{}', using mock", other);
            Ok(Box::new(MockGeocoder::new()))
        }
    }
}

// ==========================================================================
// Order and depot resolution
// ==========================================================================

/// Outcome counts of one geocoding pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeocodeStats {
    /// Orders that already had coordinates
    pub preset: usize,
    pub resolved: usize,
    pub failed: usize,
    /// Left unresolved because the run was cancelled
    pub skipped: usize,
    /// Calls actually made to the geocoder
    pub calls: usize,
}

/// Geocode every `Unresolved` order, one call at a time.
///
/// A hit marks the order `Resolved`; no hit or an error marks it `Failed`.
/// Identical addresses are looked up once. After cancellation no further
/// calls are made and the remaining orders stay `Unresolved`.
pub async fn resolve_locations(
    orders: &mut [Order],
    geocoder: &dyn Geocoder,
    limiter: &RateLimiter,
    cancel: &CancellationToken,
) -> GeocodeStats {
    let mut stats = GeocodeStats::default();
    let mut cache: HashMap<String, Option<Coordinates>> = HashMap::new();

    for order in orders.iter_mut() {
        if order.location != Location::Unresolved {
            if order.location.is_resolved() {
                stats.preset += 1;
            }
            continue;
        }

        let key = order.address.trim().to_lowercase();
        let found = match cache.get(&key) {
            Some(found) => *found,
            None => {
                if cancel.is_cancelled() {
                    stats.skipped += 1;
                    continue;
                }

                limiter.wait().await;
                stats.calls += 1;
                let found = match geocoder.geocode(&order.address).await {
                    Ok(Some(result)) => {
                        debug!("Geocoded '{}' -> {:?}", order.address, result.coordinates);
                        Some(result.coordinates)
                    }
                    Ok(None) => {
                        warn!("No geocoding result for order {} '{}'", order.id, order.address);
                        None
                    }
                    Err(e) => {
                        warn!("Geocoding order {} '{}' failed: {}", order.id, order.address, e);
                        None
                    }
                };
                cache.insert(key, found);
                found
            }
        };

        match found {
            Some(coordinates) => {
                order.location = Location::Resolved(coordinates);
                stats.resolved += 1;
            }
            None => {
                order.location = Location::Failed;
                stats.failed += 1;
            }
        }
    }

    info!(
        "Geocoding with {}: {} resolved, {} failed, {} skipped, {} preset ({} calls)",
        geocoder.name(),
        stats.resolved,
        stats.failed,
        stats.skipped,
        stats.preset,
        stats.calls
    );
    stats
}

/// Resolve the depot: configured coordinates, then the geocoded address,
/// then the built-in fallback.
pub async fn resolve_depot(
    configured: Option<Coordinates>,
    address: &str,
    geocoder: &dyn Geocoder,
    cancel: &CancellationToken,
) -> Coordinates {
    if let Some(coordinates) = configured {
        info!("Using configured depot coordinates {:?}", coordinates);
        return coordinates;
    }

    if !cancel.is_cancelled() {
        match geocoder.geocode(address).await {
            Ok(Some(result)) => {
                info!("Depot '{}' geocoded to {:?}", address, result.coordinates);
                return result.coordinates;
            }
            Ok(None) => warn!("Depot address '{}' not found", address),
            Err(e) => warn!("Depot geocoding failed: {}", e),
        }
    }

    let fallback = fallback_depot();
    warn!("Using fallback depot {:?}", fallback);
    fallback
}
