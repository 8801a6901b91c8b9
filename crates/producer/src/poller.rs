//! Feed poller
//!
//! One sweep visits every source in order, classifies unseen items and
//! buffers the alerts on the bus, then flushes once. Sweeps repeat on a
//! fixed interval until the cancellation token fires.

use crate::dedup::SeenIds;
use crate::errors::PollError;
use crate::feeds::FeedSource;
use chrono::Utc;
use newsguard_common::{
    classifier::{SeverityClassifier, Verdict},
    config::ProducerConfig,
    metrics,
    queue::{MessageBus, OutboundMessage},
    text::{join_title_summary, strip_markup},
    CandidateAlert, NewsItem,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Counters for one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub fetched: usize,
    pub skipped_seen: usize,
    pub skipped_empty: usize,
    pub below_threshold: usize,
    pub classifier_errors: usize,
    pub publish_errors: usize,
    pub feed_errors: usize,
    pub published: usize,
    pub flushed: usize,
    pub flush_failed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Seen,
    Empty,
    BelowThreshold,
    Published,
}

pub struct Poller {
    sources: Vec<Arc<dyn FeedSource>>,
    classifier: Arc<SeverityClassifier>,
    bus: Arc<dyn MessageBus>,
    seen: SeenIds,
    max_per_feed: usize,
    interval: Duration,
}

impl Poller {
    pub fn new(
        sources: Vec<Arc<dyn FeedSource>>,
        classifier: Arc<SeverityClassifier>,
        bus: Arc<dyn MessageBus>,
        config: &ProducerConfig,
    ) -> Self {
        Self {
            sources,
            classifier,
            bus,
            seen: SeenIds::new(config.seen_capacity),
            max_per_feed: config.max_per_feed,
            interval: Duration::from_secs(config.poll_interval_secs),
        }
    }

    /// Poll until cancelled, then close the bus
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), PollError> {
        info!(
            sources = self.sources.len(),
            interval_secs = self.interval.as_secs(),
            "Producer loop started"
        );

        while !cancel.is_cancelled() {
            let stats = self.sweep().await;
            info!(
                fetched = stats.fetched,
                published = stats.published,
                flushed = stats.flushed,
                below_threshold = stats.below_threshold,
                skipped_seen = stats.skipped_seen,
                classifier_errors = stats.classifier_errors,
                feed_errors = stats.feed_errors,
                "Sweep finished"
            );

            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("Shutdown requested, closing bus");
        self.bus.close().await?;
        Ok(())
    }

    /// Visit every source once, then flush the bus
    pub async fn sweep(&mut self) -> SweepStats {
        let mut stats = SweepStats::default();

        for source in self.sources.clone() {
            let items = match source.fetch().await {
                Ok(items) => items,
                Err(e) => {
                    let err = PollError::Feed {
                        url: source.url().to_string(),
                        message: format!("{:#}", e),
                    };
                    warn!(error = %err, "Skipping feed for this sweep");
                    metrics::record_feed_error(source.url());
                    stats.feed_errors += 1;
                    continue;
                }
            };

            let mut published_here = 0;
            for item in items.into_iter().take(self.max_per_feed) {
                stats.fetched += 1;
                match self.process_item(item).await {
                    Ok(ItemOutcome::Published) => published_here += 1,
                    Ok(ItemOutcome::Seen) => stats.skipped_seen += 1,
                    Ok(ItemOutcome::Empty) => stats.skipped_empty += 1,
                    Ok(ItemOutcome::BelowThreshold) => stats.below_threshold += 1,
                    Err(e @ PollError::Classify { .. }) => {
                        warn!(error = %e, "Skipping item");
                        stats.classifier_errors += 1;
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to publish item");
                        stats.publish_errors += 1;
                    }
                }
            }

            if published_here > 0 {
                metrics::record_published(source.url(), published_here);
            }
            stats.published += published_here;
        }

        // Also drains anything a failed flush left buffered
        match self.bus.flush().await {
            Ok(sent) => stats.flushed = sent,
            Err(e) => {
                error!(error = %e, published = stats.published, "Flush failed");
                metrics::record_flush_error();
                stats.flush_failed = true;
            }
        }

        metrics::record_seen_ids(self.seen.len());
        stats
    }

    #[instrument(skip(self, item), fields(id = %item.external_id, source = %item.source_name))]
    async fn process_item(&mut self, item: NewsItem) -> Result<ItemOutcome, PollError> {
        if item.external_id.trim().is_empty() {
            return Ok(ItemOutcome::Empty);
        }
        if self.seen.contains(&item.external_id) {
            return Ok(ItemOutcome::Seen);
        }

        let title = item.title.trim().to_string();
        let summary = strip_markup(&item.raw_summary);
        let text = join_title_summary(&title, &summary);
        if text.is_empty() {
            debug!("Empty title and summary");
            return Ok(ItemOutcome::Empty);
        }

        let verdict = self
            .classifier
            .classify(&text)
            .await
            .map_err(|source| PollError::Classify {
                id: item.external_id.clone(),
                source,
            })?;

        let classification = match verdict {
            Verdict::BelowThreshold { violence_score } => {
                debug!(violence_score, "Dropped below threshold");
                return Ok(ItemOutcome::BelowThreshold);
            }
            Verdict::Alert(classification) => classification,
        };

        let alert = CandidateAlert {
            id: item.external_id,
            source: item.source_name,
            title,
            summary,
            published_at: item.published_at,
            violence_score: classification.violence_score,
            severity_band: classification.severity_band,
            activities: classification.activities,
            fetched_at: Utc::now(),
            language: item.language,
            image_url: item.image_url,
        };

        let message = OutboundMessage {
            key: alert.id.clone(),
            group: alert.source.clone(),
            payload: alert.encode()?,
        };

        self.bus
            .publish(message)
            .await
            .map_err(|source| PollError::Publish {
                id: alert.id.clone(),
                source,
            })?;
        self.seen.insert(&alert.id);

        info!(
            violence_score = alert.violence_score,
            severity_band = %alert.severity_band,
            activities = ?alert.activities,
            "Alert published"
        );
        Ok(ItemOutcome::Published)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeds::StaticFeed;
    use newsguard_common::classifier::{ClassifierSettings, MockZeroShotClassifier};
    use newsguard_common::queue::MemoryBus;
    use newsguard_common::SeverityBand;

    fn item(id: &str, title: &str, summary: &str) -> NewsItem {
        NewsItem {
            external_id: id.to_string(),
            source_name: "World Wire".to_string(),
            title: title.to_string(),
            raw_summary: summary.to_string(),
            published_at: None,
            language: None,
            image_url: None,
        }
    }

    fn feed(items: Vec<NewsItem>) -> Arc<dyn FeedSource> {
        Arc::new(StaticFeed {
            url: "https://example.com/rss".to_string(),
            items,
            fail: false,
        })
    }

    fn config() -> ProducerConfig {
        ProducerConfig {
            max_per_feed: 20,
            seen_capacity: 100,
            ..Default::default()
        }
    }

    fn poller(sources: Vec<Arc<dyn FeedSource>>, model: MockZeroShotClassifier, bus: &MemoryBus) -> Poller {
        let settings = ClassifierSettings {
            violence_threshold: 0.6,
            activity_threshold: 0.3,
            activity_labels: vec!["civil-unrest".to_string(), "armed-conflict".to_string()],
        };
        let classifier = Arc::new(SeverityClassifier::new(Arc::new(model), settings));
        Poller::new(sources, classifier, Arc::new(bus.clone()), &config())
    }

    fn lagos_model() -> MockZeroShotClassifier {
        MockZeroShotClassifier::new()
            .with_text_scores(
                "Lagos",
                &[("violent", 0.91), ("civil-unrest", 0.8), ("armed-conflict", 0.1)],
            )
            .with_score("violent", 0.2)
    }

    #[tokio::test]
    async fn test_lagos_item_published() {
        let bus = MemoryBus::new();
        let mut poller = poller(
            vec![feed(vec![item("a1", "Riot breaks out in Lagos", "<p>Police fired tear gas</p>")])],
            lagos_model(),
            &bus,
        );

        let stats = poller.sweep().await;
        assert_eq!(stats.published, 1);
        assert_eq!(stats.flushed, 1);

        let published = bus.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].key, "a1");
        assert_eq!(published[0].group, "World Wire");

        let alert = CandidateAlert::decode(&published[0].payload).unwrap();
        assert_eq!(alert.id, "a1");
        assert_eq!(alert.violence_score, 0.91);
        assert_eq!(alert.severity_band, SeverityBand::High);
        assert_eq!(alert.activities, vec!["civil-unrest".to_string()]);
        assert_eq!(alert.summary, "Police fired tear gas");
    }

    #[tokio::test]
    async fn test_below_threshold_and_seen_items_skipped() {
        let bus = MemoryBus::new();
        let items = vec![
            item("a1", "Riot breaks out in Lagos", ""),
            item("b2", "Bake sale raises funds", ""),
            item("a1", "Riot breaks out in Lagos", "repeat"),
        ];
        let mut poller = poller(vec![feed(items)], lagos_model(), &bus);

        let first = poller.sweep().await;
        assert_eq!(first.published, 1);
        assert_eq!(first.below_threshold, 1);
        assert_eq!(first.skipped_seen, 1);

        let second = poller.sweep().await;
        assert_eq!(second.published, 0);
        assert_eq!(second.skipped_seen, 2);
        assert_eq!(bus.published().len(), 1);
    }

    #[tokio::test]
    async fn test_classifier_failure_skips_item_and_retries_next_sweep() {
        let bus = MemoryBus::new();
        let model = lagos_model().failing_on("Kano");
        let items = vec![
            item("k1", "Clashes in Kano", ""),
            item("a1", "Riot breaks out in Lagos", ""),
        ];
        let mut poller = poller(vec![feed(items)], model, &bus);

        let stats = poller.sweep().await;
        assert_eq!(stats.classifier_errors, 1);
        assert_eq!(stats.published, 1);

        let again = poller.sweep().await;
        assert_eq!(again.classifier_errors, 1);
    }

    #[tokio::test]
    async fn test_feed_failure_does_not_stop_sweep() {
        let bus = MemoryBus::new();
        let broken: Arc<dyn FeedSource> = Arc::new(StaticFeed {
            url: "https://broken.example.com/rss".to_string(),
            items: Vec::new(),
            fail: true,
        });
        let mut poller = poller(
            vec![broken, feed(vec![item("a1", "Riot breaks out in Lagos", "")])],
            lagos_model(),
            &bus,
        );

        let stats = poller.sweep().await;
        assert_eq!(stats.feed_errors, 1);
        assert_eq!(stats.published, 1);
    }

    #[tokio::test]
    async fn test_empty_items_and_cap() {
        let bus = MemoryBus::new();
        let mut items = vec![item("e1", "  ", "<br/>")];
        items.extend((0..30).map(|i| item(&format!("l{}", i), "Riot breaks out in Lagos", "")));
        let mut poller = poller(vec![feed(items)], lagos_model(), &bus);

        let stats = poller.sweep().await;
        assert_eq!(stats.fetched, 20);
        assert_eq!(stats.skipped_empty, 1);
        assert_eq!(stats.published, 19);
    }

    #[tokio::test]
    async fn test_flush_failure_is_reported_and_messages_kept() {
        let bus = MemoryBus::new();
        bus.fail_flushes(1);
        let mut poller = poller(
            vec![feed(vec![item("a1", "Riot breaks out in Lagos", "")])],
            lagos_model(),
            &bus,
        );

        let stats = poller.sweep().await;
        assert!(stats.flush_failed);
        assert_eq!(bus.pending_len(), 1);
        assert!(bus.published().is_empty());
    }

    #[tokio::test]
    async fn test_quiet_sweep_flushes_messages_left_by_failed_flush() {
        let bus = MemoryBus::new();
        bus.fail_flushes(1);
        let mut poller = poller(
            vec![feed(vec![item("a1", "Riot breaks out in Lagos", "")])],
            lagos_model(),
            &bus,
        );

        assert!(poller.sweep().await.flush_failed);

        let quiet = poller.sweep().await;
        assert_eq!(quiet.published, 0);
        assert_eq!(quiet.skipped_seen, 1);
        assert_eq!(quiet.flushed, 1);
        assert!(!quiet.flush_failed);
        assert_eq!(bus.pending_len(), 0);
        assert_eq!(bus.published()[0].key, "a1");
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel_and_closes_bus() {
        let bus = MemoryBus::new();
        let poller = poller(
            vec![feed(vec![item("a1", "Riot breaks out in Lagos", "")])],
            lagos_model(),
            &bus,
        );

        let cancel = CancellationToken::new();
        cancel.cancel();
        tokio_test::assert_ok!(poller.run(cancel).await);
        assert!(bus.is_closed());
    }
}
