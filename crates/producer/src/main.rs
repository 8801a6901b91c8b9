//! Newsguard Producer
//!
//! Polls news feeds and publishes candidate alerts:
//! 1. Fetches every configured feed
//! 2. Skips items already produced by this process
//! 3. Scores violence and tags activities via the zero-shot model
//! 4. Publishes alerts above the threshold and flushes once per sweep

mod dedup;
mod errors;
mod feeds;
mod poller;

use crate::feeds::{FeedSource, HttpFeedSource};
use crate::poller::Poller;
use newsguard_common::{
    classifier::{ClassifierSettings, HttpZeroShotClassifier, SeverityClassifier, ZeroShotClassifier},
    config::AppConfig,
    queue::{MessageBus, SqsBus},
    telemetry, VERSION,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;
    telemetry::init_tracing(&config.observability);

    info!("Starting Newsguard Producer v{}", VERSION);

    config.validate().map_err(|e| {
        error!(error = %e, "Invalid configuration");
        e
    })?;
    telemetry::install_metrics_exporter(&config.observability)?;

    let model = HttpZeroShotClassifier::new(&config.classifier)?;
    info!(model = %model.model_name(), "Zero-shot classifier initialized");
    let classifier = Arc::new(SeverityClassifier::new(
        Arc::new(model),
        ClassifierSettings::from(&config.producer),
    ));

    let sources: Vec<Arc<dyn FeedSource>> = HttpFeedSource::from_urls(
        &config.producer.feeds,
        Duration::from_secs(config.producer.feed_timeout_secs),
        &format!("newsguard-producer/{}", VERSION),
    )?
    .into_iter()
    .map(|source| Arc::new(source) as Arc<dyn FeedSource>)
    .collect();

    info!(topic = %config.broker.topic, "Connecting to message bus...");
    let bus: Arc<dyn MessageBus> = Arc::new(SqsBus::new(&config.broker).await?);

    let cancel = CancellationToken::new();
    telemetry::spawn_shutdown_listener(cancel.clone());

    Poller::new(sources, classifier, bus, &config.producer)
        .run(cancel)
        .await?;

    info!("Producer shut down");
    Ok(())
}
