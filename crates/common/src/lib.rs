//! Newsguard Common Library
//!
//! Shared code for the Newsguard pipeline services including:
//! - Alert data model and wire format
//! - Message bus abstraction (SQS topic + in-memory bus)
//! - Alert store (PostGIS) with first-write-wins inserts
//! - Zero-shot severity classifier adapter
//! - Entity/geocode resolver adapter
//! - Error types, configuration, metrics and telemetry

pub mod classifier;
pub mod config;
pub mod db;
pub mod errors;
pub mod metrics;
pub mod models;
pub mod queue;
pub mod resolver;
pub mod telemetry;
pub mod text;

// Re-export commonly used types
pub use config::AppConfig;
pub use errors::{AppError, Result};
pub use models::{CandidateAlert, EnrichedAlert, Entity, GeoPoint, NewsItem, SeverityBand};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Sentinel activity tag used when no activity clears its threshold
pub const OTHER_ACTIVITY: &str = "other";

/// Default topic name for candidate alerts
pub const DEFAULT_TOPIC: &str = "news-violence";
