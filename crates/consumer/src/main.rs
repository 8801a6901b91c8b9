//! Newsguard Consumer
//!
//! Enriches candidate alerts from the topic:
//! 1. Receives one alert from the queue
//! 2. Extracts entities and geocodes the first resolvable place
//! 3. Inserts the row into PostGIS, first write wins
//! 4. Acknowledges the message once the insert has committed

mod processor;

use crate::processor::{Consumer, ConsumerSettings};
use newsguard_common::{
    config::AppConfig,
    db::PgAlertStore,
    queue::{MessageBus, SqsBus},
    resolver::{LocationResolver, Resolver},
    telemetry, VERSION,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;
    telemetry::init_tracing(&config.observability);

    info!("Starting Newsguard Consumer v{}", VERSION);

    config.validate().map_err(|e| {
        error!(error = %e, "Invalid configuration");
        e
    })?;
    telemetry::install_metrics_exporter(&config.observability)?;

    let resolver: Arc<dyn LocationResolver> = Arc::new(Resolver::from_config(&config.resolver)?);
    info!(
        ner_model = %config.resolver.ner_model,
        geocoder = %config.resolver.geocoder_base,
        "Resolver initialized"
    );

    info!(topic = %config.broker.topic, "Connecting to message bus...");
    let bus: Arc<dyn MessageBus> = Arc::new(SqsBus::new(&config.broker).await?);
    let store = PgAlertStore::new(config.database.clone());

    let cancel = CancellationToken::new();
    telemetry::spawn_shutdown_listener(cancel.clone());

    Consumer::new(bus, resolver, store, ConsumerSettings::from(&config))
        .run(cancel)
        .await
        .map_err(|e| {
            error!(error = %e, "Consumer stopped");
            e
        })?;

    info!("Consumer shut down");
    Ok(())
}
