//! Business logic services

pub mod catalog;
pub mod export;
pub mod geo;
pub mod geocoding;
pub mod nominatim;
pub mod planner;
pub mod rate_limiter;
pub mod routing;
pub mod sequencer;
pub mod trip_builder;
pub mod vehicle_rules;
