//! In-memory alert store with failure injection

use super::{AlertStore, InsertOutcome};
use crate::errors::{AppError, Result};
use crate::models::EnrichedAlert;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct StoreState {
    rows: BTreeMap<String, EnrichedAlert>,
    connected: bool,
    connect_count: u32,
    fail_connects: u32,
    fail_inserts_connection: u32,
    poisoned_ids: HashSet<String>,
}

/// Cloneable handle; clones share the same table
#[derive(Debug, Clone, Default)]
pub struct MemoryAlertStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the next `count` connection attempts fail
    pub fn fail_connects(&self, count: u32) {
        self.state().fail_connects = count;
    }

    /// Make the next `count` inserts fail as lost connections
    pub fn fail_next_inserts_with_connection_error(&self, count: u32) {
        self.state().fail_inserts_connection = count;
    }

    /// Every insert of `id` fails with a non-connection error
    pub fn fail_inserts_for(&self, id: &str) {
        self.state().poisoned_ids.insert(id.to_string());
    }

    pub fn rows(&self) -> Vec<EnrichedAlert> {
        self.state().rows.values().cloned().collect()
    }

    /// Successful connects so far
    pub fn connect_count(&self) -> u32 {
        self.state().connect_count
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    fn ensure_connected(state: &StoreState) -> Result<()> {
        if state.connected {
            Ok(())
        } else {
            Err(AppError::DatabaseConnection {
                message: "Not connected".to_string(),
            })
        }
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn connect(&mut self) -> Result<()> {
        let mut state = self.state();
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(AppError::DatabaseConnection {
                message: "injected connect failure".to_string(),
            });
        }

        state.connected = true;
        state.connect_count += 1;
        Ok(())
    }

    async fn insert_alert(&mut self, alert: &EnrichedAlert) -> Result<InsertOutcome> {
        let mut state = self.state();
        Self::ensure_connected(&state)?;

        if state.fail_inserts_connection > 0 {
            state.fail_inserts_connection -= 1;
            state.connected = false;
            return Err(AppError::DatabaseConnection {
                message: "injected connection loss".to_string(),
            });
        }

        if state.poisoned_ids.contains(&alert.id) {
            return Err(AppError::Database {
                message: format!("injected constraint violation for {}", alert.id),
            });
        }

        if state.rows.contains_key(&alert.id) {
            return Ok(InsertOutcome::Duplicate);
        }

        state.rows.insert(alert.id.clone(), alert.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn fetch_alert(&mut self, id: &str) -> Result<Option<EnrichedAlert>> {
        let state = self.state();
        Self::ensure_connected(&state)?;
        Ok(state.rows.get(id).cloned())
    }

    async fn close(&mut self) {
        self.state().connected = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SeverityBand;
    use chrono::Utc;

    fn alert(id: &str, title: &str) -> EnrichedAlert {
        EnrichedAlert {
            id: id.to_string(),
            source: "Wire".to_string(),
            title: title.to_string(),
            summary: String::new(),
            published_at: None,
            violence_score: 0.7,
            severity_band: SeverityBand::Medium,
            activities: vec!["other".to_string()],
            fetched_at: Utc::now(),
            geom: None,
            entities: Vec::new(),
            language: "en".to_string(),
            image_url: None,
        }
    }

    #[tokio::test]
    async fn test_first_write_wins() {
        let mut store = MemoryAlertStore::new();
        store.connect().await.unwrap();

        assert_eq!(store.insert_alert(&alert("a1", "first")).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(store.insert_alert(&alert("a1", "second")).await.unwrap(), InsertOutcome::Duplicate);

        let row = store.fetch_alert("a1").await.unwrap().unwrap();
        assert_eq!(row.title, "first");
        assert_eq!(store.rows().len(), 1);
    }

    #[tokio::test]
    async fn test_connection_loss_requires_reconnect() {
        let mut store = MemoryAlertStore::new();
        store.connect().await.unwrap();
        store.fail_next_inserts_with_connection_error(1);

        assert!(store.insert_alert(&alert("a1", "t")).await.unwrap_err().is_connection_error());
        assert!(!store.is_connected());
        assert!(store.insert_alert(&alert("a1", "t")).await.is_err());

        store.connect().await.unwrap();
        assert_eq!(store.insert_alert(&alert("a1", "t")).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(store.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_injected_data_error_is_not_connection_error() {
        let mut store = MemoryAlertStore::new();
        store.connect().await.unwrap();
        store.fail_inserts_for("bad");

        let err = store.insert_alert(&alert("bad", "t")).await.unwrap_err();
        assert!(!err.is_connection_error());
        assert!(store.rows().is_empty());
    }
}
