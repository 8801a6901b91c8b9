//! Alert store
//!
//! Provides:
//! - `AlertStore` trait owned by the consumer loop
//! - PostGIS implementation with first-write-wins inserts
//! - In-memory implementation with failure injection for tests

mod memory;
mod postgres;

pub use memory::MemoryAlertStore;
pub use postgres::PgAlertStore;

use crate::errors::Result;
use crate::models::EnrichedAlert;
use async_trait::async_trait;

/// Result of an idempotent insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The row was written
    Inserted,
    /// A row with the same id already existed and was left unchanged
    Duplicate,
}

/// Exclusive handle to the alert table.
///
/// Errors for which `AppError::is_connection_error` holds mean the handle
/// must be reconnected before it is used again.
#[async_trait]
pub trait AlertStore: Send {
    /// Open the connection and create the schema if it does not exist
    async fn connect(&mut self) -> Result<()>;

    /// Insert in a single transaction, keeping any existing row
    async fn insert_alert(&mut self, alert: &EnrichedAlert) -> Result<InsertOutcome>;

    async fn fetch_alert(&mut self, id: &str) -> Result<Option<EnrichedAlert>>;

    /// Drop the connection. Safe to call when not connected.
    async fn close(&mut self);
}
