//! Enrichment consumer
//!
//! Takes candidate alerts off the bus one at a time, resolves entities and
//! location, and writes the enriched row. A message is acknowledged only
//! after its insert transaction commits.

use newsguard_common::{
    config::AppConfig,
    db::{AlertStore, InsertOutcome},
    metrics,
    queue::{Delivery, MessageBus},
    resolver::LocationResolver,
    text::{join_title_summary, strip_markup},
    AppError, CandidateAlert, EnrichedAlert,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Consumer loop settings
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// Upper bound on one bus poll
    pub poll_wait: Duration,
    /// Fixed wait between reconnect attempts
    pub reconnect_backoff: Duration,
    /// Non-connection failures tolerated per alert id before dead-lettering
    pub max_delivery_attempts: u32,
    pub default_language: String,
}

impl From<&AppConfig> for ConsumerSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            poll_wait: Duration::from_secs(config.broker.poll_wait_secs),
            reconnect_backoff: config.reconnect_backoff(),
            max_delivery_attempts: config.consumer.max_delivery_attempts.max(1),
            default_language: config.consumer.default_language.clone(),
        }
    }
}

/// What happened to one polled message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Nothing arrived within the poll wait
    Empty,
    /// Stored (or already present) and acknowledged
    Committed { id: String, outcome: InsertOutcome },
    /// Released unacknowledged for redelivery
    RetryPending { id: String },
    /// Moved to the dead letter channel and acknowledged
    DeadLettered { reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Broker error: {0}")]
    Broker(AppError),

    #[error("Cancelled")]
    Cancelled,
}

pub struct Consumer<S: AlertStore> {
    bus: Arc<dyn MessageBus>,
    resolver: Arc<dyn LocationResolver>,
    store: S,
    settings: ConsumerSettings,
    failures: HashMap<String, u32>,
    connected: bool,
}

impl<S: AlertStore> Consumer<S> {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        resolver: Arc<dyn LocationResolver>,
        store: S,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            bus,
            resolver,
            store,
            settings,
            failures: HashMap::new(),
            connected: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Connect to the store, retrying forever at a fixed interval
    pub async fn connect_with_retry(&mut self, cancel: &CancellationToken) -> Result<(), ProcessError> {
        let mut attempt: u64 = 0;

        loop {
            attempt += 1;
            match self.store.connect().await {
                Ok(()) => {
                    metrics::record_reconnect(true);
                    info!(attempt, "Store connected");
                    self.connected = true;
                    return Ok(());
                }
                Err(e) => {
                    metrics::record_reconnect(false);
                    warn!(
                        attempt,
                        error = %e,
                        retry_in_secs = self.settings.reconnect_backoff.as_secs_f64(),
                        "Store connection failed"
                    );
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(ProcessError::Cancelled),
                _ = tokio::time::sleep(self.settings.reconnect_backoff) => {}
            }
        }
    }

    /// Poll once and handle whatever arrives
    #[cfg(test)]
    pub async fn process_next(&mut self) -> Result<Step, ProcessError> {
        let polled = self.bus.poll(self.settings.poll_wait).await;
        self.dispatch(polled).await
    }

    /// Handle one poll result. Only broker errors escape.
    async fn dispatch(&mut self, polled: newsguard_common::Result<Option<Delivery>>) -> Result<Step, ProcessError> {
        match polled {
            Ok(Some(delivery)) => Ok(self.handle(delivery).await),
            Ok(None) => Ok(Step::Empty),
            Err(e) => Err(ProcessError::Broker(e)),
        }
    }

    /// Run until cancelled or the broker fails. Tears down bus, then store.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), ProcessError> {
        info!("Consumer loop started");

        let result = loop {
            if cancel.is_cancelled() {
                break Ok(());
            }

            if !self.connected {
                match self.connect_with_retry(&cancel).await {
                    Ok(()) => {}
                    Err(ProcessError::Cancelled) => break Ok(()),
                    Err(e) => break Err(e),
                }
            }

            let polled = tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                polled = self.bus.poll(self.settings.poll_wait) => polled,
            };

            // A taken message is always finished before cancellation is seen
            if let Err(e) = self.dispatch(polled).await {
                error!(error = %e, "Broker delivery failed, stopping");
                break Err(e);
            }
        };

        self.shutdown().await;
        result
    }

    async fn shutdown(&mut self) {
        info!("Closing message bus");
        if let Err(e) = self.bus.close().await {
            error!(error = %e, "Failed to close message bus");
        }

        info!("Closing store connection");
        self.store.close().await;
        self.connected = false;
    }

    #[instrument(skip_all, fields(message_id = %delivery.message_id, delivery_count = delivery.delivery_count))]
    async fn handle(&mut self, delivery: Delivery) -> Step {
        let candidate = match CandidateAlert::decode(&delivery.payload) {
            Ok(candidate) => candidate,
            Err(e) => {
                warn!(error = %e, "Undecodable message");
                return self.dead_letter(&delivery, format!("decode: {}", e)).await;
            }
        };

        let id = candidate.id.clone();
        let summary = strip_markup(&candidate.summary);
        let resolution = self
            .resolver
            .resolve(&join_title_summary(&candidate.title, &summary))
            .await;

        debug!(
            id = %id,
            entities = resolution.entities.len(),
            geocoded = resolution.geom.is_some(),
            "Alert resolved"
        );

        let alert = EnrichedAlert::from_candidate(
            candidate,
            summary,
            resolution.geom,
            resolution.entities,
            &self.settings.default_language,
        );

        match self.store.insert_alert(&alert).await {
            Ok(outcome) => {
                metrics::record_persist(match outcome {
                    InsertOutcome::Inserted => "inserted",
                    InsertOutcome::Duplicate => "duplicate",
                });
                self.failures.remove(&id);

                if let Err(e) = self.bus.commit(&delivery).await {
                    // Redelivery hits the existing row and is acknowledged then
                    error!(id = %id, error = %e, "Failed to acknowledge stored alert");
                }
                info!(id = %id, ?outcome, "Alert stored");
                Step::Committed { id, outcome }
            }
            Err(e) if e.is_connection_error() => {
                metrics::record_persist("connection_error");
                warn!(id = %id, error = %e, "Store connection lost, releasing message");
                self.connected = false;
                self.release(&delivery).await;
                Step::RetryPending { id }
            }
            Err(e) => {
                metrics::record_persist("error");
                let failures = self.failures.entry(id.clone()).or_insert(0);
                *failures += 1;
                let failures = *failures;

                if failures >= self.settings.max_delivery_attempts {
                    self.failures.remove(&id);
                    error!(id = %id, failures, code = e.code().as_code(), error = %e, "Giving up on alert");
                    return self.dead_letter(&delivery, format!("persist: {}", e)).await;
                }

                warn!(
                    id = %id,
                    failures,
                    max_attempts = self.settings.max_delivery_attempts,
                    code = e.code().as_code(),
                    error = %e,
                    "Insert failed, releasing message"
                );
                self.release(&delivery).await;
                Step::RetryPending { id }
            }
        }
    }

    async fn release(&self, delivery: &Delivery) {
        if let Err(e) = self.bus.release(delivery).await {
            // The broker redelivers after the visibility timeout anyway
            error!(error = %e, "Failed to release message");
        }
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: String) -> Step {
        match self.bus.dead_letter(delivery, &reason).await {
            Ok(()) => {
                metrics::record_dead_letter(reason.split(':').next().unwrap_or("unknown"));
            }
            Err(e) => {
                error!(error = %e, reason = %reason, "Failed to dead-letter message");
                self.release(delivery).await;
            }
        }
        Step::DeadLettered { reason }
    }
}
