//! Alert data model
//!
//! Records that flow through the pipeline:
//! feed entry ([`NewsItem`]) → wire message ([`CandidateAlert`]) → stored row ([`EnrichedAlert`])

mod alert;
mod geo;

pub use alert::{CandidateAlert, EnrichedAlert, NewsItem, SeverityBand};
pub use geo::{Entity, GeoPoint, SRID};
