//! Metrics and observability utilities
//!
//! Prometheus metrics for both pipeline loops with standardized naming.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};

/// Metrics prefix for all Newsguard metrics
pub const METRICS_PREFIX: &str = "newsguard";

/// Buckets for model and geocoder latency (in seconds)
pub const UPSTREAM_BUCKETS: &[f64] = &[
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.000,  // 2s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Producer metrics
    describe_counter!(
        format!("{}_feed_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Feed fetch or parse failures"
    );

    describe_counter!(
        format!("{}_items_classified_total", METRICS_PREFIX),
        Unit::Count,
        "Feed items scored by the classifier, by outcome"
    );

    describe_counter!(
        format!("{}_classifier_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Classifier calls that failed"
    );

    describe_histogram!(
        format!("{}_classifier_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Classifier latency in seconds"
    );

    describe_counter!(
        format!("{}_alerts_published_total", METRICS_PREFIX),
        Unit::Count,
        "Candidate alerts handed to the broker"
    );

    describe_counter!(
        format!("{}_flush_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Broker flushes that failed"
    );

    describe_gauge!(
        format!("{}_seen_ids", METRICS_PREFIX),
        Unit::Count,
        "Ids held in the producer dedup set"
    );

    // Consumer metrics
    describe_counter!(
        format!("{}_geocode_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Geocoder lookups, by outcome"
    );

    describe_histogram!(
        format!("{}_geocode_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Geocoder latency in seconds"
    );

    describe_counter!(
        format!("{}_alerts_persisted_total", METRICS_PREFIX),
        Unit::Count,
        "Alert insert attempts, by outcome"
    );

    describe_counter!(
        format!("{}_dead_letters_total", METRICS_PREFIX),
        Unit::Count,
        "Messages routed to the dead letter queue"
    );

    describe_counter!(
        format!("{}_db_reconnects_total", METRICS_PREFIX),
        Unit::Count,
        "Database reconnect attempts"
    );

    tracing::info!("Metrics registered");
}

pub fn record_feed_error(source: &str) {
    counter!(
        format!("{}_feed_errors_total", METRICS_PREFIX),
        "source" => source.to_string()
    )
    .increment(1);
}

/// Helper to record classifier metrics. `outcome` is `alert`, `below_threshold` or `error`.
pub fn record_classification(duration_secs: f64, outcome: &str) {
    counter!(
        format!("{}_items_classified_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    if outcome == "error" {
        counter!(format!("{}_classifier_errors_total", METRICS_PREFIX)).increment(1);
    } else {
        histogram!(format!("{}_classifier_duration_seconds", METRICS_PREFIX)).record(duration_secs);
    }
}

pub fn record_published(source: &str, count: usize) {
    counter!(
        format!("{}_alerts_published_total", METRICS_PREFIX),
        "source" => source.to_string()
    )
    .increment(count as u64);
}

pub fn record_flush_error() {
    counter!(format!("{}_flush_errors_total", METRICS_PREFIX)).increment(1);
}

pub fn record_seen_ids(count: usize) {
    gauge!(format!("{}_seen_ids", METRICS_PREFIX)).set(count as f64);
}

/// Helper to record geocoder metrics. `outcome` is `hit`, `miss` or `error`.
pub fn record_geocode(duration_secs: f64, outcome: &str) {
    counter!(
        format!("{}_geocode_requests_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(format!("{}_geocode_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}

/// `outcome` is `inserted`, `duplicate`, `connection_error` or `error`
pub fn record_persist(outcome: &str) {
    counter!(
        format!("{}_alerts_persisted_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn record_dead_letter(reason: &str) {
    counter!(
        format!("{}_dead_letters_total", METRICS_PREFIX),
        "reason" => reason.to_string()
    )
    .increment(1);
}

pub fn record_reconnect(success: bool) {
    let status = if success { "success" } else { "error" };
    counter!(
        format!("{}_db_reconnects_total", METRICS_PREFIX),
        "status" => status.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_buckets_sorted() {
        let mut prev = 0.0;
        for &bucket in UPSTREAM_BUCKETS {
            assert!(bucket > prev);
            prev = bucket;
        }
    }

    #[test]
    fn test_recorders_without_exporter() {
        // No recorder installed: every helper is a no-op
        register_metrics();
        record_classification(0.2, "alert");
        record_classification(0.0, "error");
        record_geocode(0.5, "hit");
        record_persist("duplicate");
        record_dead_letter("decode");
    }
}
