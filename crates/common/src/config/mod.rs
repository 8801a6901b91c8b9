//! Configuration management for Newsguard services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Message broker configuration (SQS)
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Feed poller configuration
    #[serde(default)]
    pub producer: ProducerConfig,

    /// Zero-shot classifier service configuration
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Entity recognition and geocoding configuration
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Enrichment consumer configuration
    #[serde(default)]
    pub consumer: ConsumerConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerConfig {
    /// Topic name, used for logging and as the queue name when no URL is set
    #[serde(default = "default_topic")]
    pub topic: String,

    /// SQS queue URL carrying candidate alerts
    pub queue_url: Option<String>,

    /// Dead letter queue URL for poison messages
    pub dlq_url: Option<String>,

    /// Custom endpoint (LocalStack, ElasticMQ)
    pub endpoint_url: Option<String>,

    /// AWS region override
    pub region: Option<String>,

    /// Whether the queue is a FIFO queue (per-source ordering)
    #[serde(default)]
    pub fifo: bool,

    /// Long polling wait in seconds (max 20)
    #[serde(default = "default_poll_wait")]
    pub poll_wait_secs: u64,

    /// Visibility timeout in seconds
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Database URL
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Delay between reconnect attempts in seconds
    #[serde(default = "default_reconnect_backoff")]
    pub reconnect_backoff_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProducerConfig {
    /// RSS/Atom feed URLs
    #[serde(default = "default_feeds")]
    pub feeds: Vec<String>,

    /// Seconds to sleep between full sweeps
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Maximum entries taken from each feed per sweep
    #[serde(default = "default_max_per_feed")]
    pub max_per_feed: usize,

    /// Minimum violence score for an item to be published
    #[serde(default = "default_violence_threshold")]
    pub violence_threshold: f64,

    /// Minimum score for an activity label to be kept
    #[serde(default = "default_activity_threshold")]
    pub activity_threshold: f64,

    /// Activity label vocabulary
    #[serde(default)]
    pub activity_labels: Vec<String>,

    /// Number of produced ids remembered for deduplication
    #[serde(default = "default_seen_capacity")]
    pub seen_capacity: usize,

    /// Feed fetch timeout in seconds
    #[serde(default = "default_feed_timeout")]
    pub feed_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClassifierConfig {
    /// Inference API base URL
    #[serde(default = "default_inference_base")]
    pub api_base: String,

    /// API token
    pub api_key: Option<String>,

    /// Zero-shot model
    #[serde(default = "default_classifier_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_inference_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResolverConfig {
    /// Inference API base URL for the NER model
    #[serde(default = "default_inference_base")]
    pub ner_api_base: String,

    /// API token for the NER model
    pub ner_api_key: Option<String>,

    /// Token classification model
    #[serde(default = "default_ner_model")]
    pub ner_model: String,

    /// Entity labels treated as places
    #[serde(default = "default_place_labels")]
    pub place_labels: Vec<String>,

    /// Geocoder base URL (Nominatim compatible)
    #[serde(default = "default_geocoder_base")]
    pub geocoder_base: String,

    /// User agent sent to the geocoder
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Minimum delay between geocode calls in milliseconds
    #[serde(default = "default_geocode_min_delay")]
    pub min_delay_ms: u64,

    /// Extra attempts after a failed geocode call
    #[serde(default = "default_geocode_retries")]
    pub max_retries: u32,

    /// Wait between geocode retries in milliseconds
    #[serde(default = "default_geocode_error_wait")]
    pub error_wait_ms: u64,

    /// Request timeout in seconds
    #[serde(default = "default_inference_timeout")]
    pub timeout_secs: u64,

    /// Weapon terms for the entity ruler
    #[serde(default)]
    pub weapon_terms: Vec<String>,

    /// File with one weapon term per line, merged into `weapon_terms`
    pub weapon_terms_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConsumerConfig {
    /// Non-connection failures tolerated for one alert id before dead-lettering
    #[serde(default = "default_max_delivery_attempts")]
    pub max_delivery_attempts: u32,

    /// Default language written when the message carries none
    #[serde(default = "default_language")]
    pub default_language: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for logs
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

/// SQS ceiling for a message visibility timeout
const MAX_VISIBILITY_TIMEOUT_SECS: u64 = 43_200;

// Default value functions
fn default_topic() -> String { crate::DEFAULT_TOPIC.to_string() }
fn default_poll_wait() -> u64 { 1 }
fn default_visibility_timeout() -> u64 { 300 }
fn default_database_url() -> String { "postgres://localhost/newsguard".to_string() }
fn default_connect_timeout() -> u64 { 10 }
fn default_reconnect_backoff() -> u64 { 5 }
fn default_feeds() -> Vec<String> {
    vec![
        "https://rss.cnn.com/rss/cnn_topstories.rss".to_string(),
        "https://www.aljazeera.com/xml/rss/all.xml".to_string(),
    ]
}
fn default_poll_interval() -> u64 { 60 }
fn default_max_per_feed() -> usize { 20 }
fn default_violence_threshold() -> f64 { 0.6 }
fn default_activity_threshold() -> f64 { 0.3 }
fn default_seen_capacity() -> usize { 10_000 }
fn default_feed_timeout() -> u64 { 15 }
fn default_inference_base() -> String { "https://api-inference.huggingface.co".to_string() }
fn default_classifier_model() -> String { "facebook/bart-large-mnli".to_string() }
fn default_inference_timeout() -> u64 { 30 }
fn default_ner_model() -> String { "dslim/bert-base-NER".to_string() }
fn default_place_labels() -> Vec<String> { vec!["GPE".to_string(), "LOC".to_string()] }
fn default_geocoder_base() -> String { "https://nominatim.openstreetmap.org".to_string() }
fn default_user_agent() -> String { format!("newsguard-consumer/{}", crate::VERSION) }
fn default_geocode_min_delay() -> u64 { 1_000 }
fn default_geocode_retries() -> u32 { 2 }
fn default_geocode_error_wait() -> u64 { 5_000 }
fn default_max_delivery_attempts() -> u32 { 5 }
fn default_language() -> String { "en".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "newsguard".to_string() }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__PRODUCER__POLL_INTERVAL_SECS=120
            .add_source(environment())

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(environment())
            .build()?;

        config.try_deserialize()
    }

    /// Delay between database reconnect attempts
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.database.reconnect_backoff_secs)
    }

    /// Worst case for recognizing entities and geocoding one place: every
    /// attempt times out and every retry waits
    pub fn single_place_budget(&self) -> Duration {
        let resolver = &self.resolver;
        let attempts = resolver.max_retries.saturating_add(1);
        let request = Duration::from_secs(resolver.timeout_secs);

        request * attempts.saturating_add(1)
            + Duration::from_millis(resolver.error_wait_ms) * resolver.max_retries
            + Duration::from_millis(resolver.min_delay_ms) * attempts
    }

    /// Check cross-field constraints that serde defaults cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        let producer = &self.producer;
        if !(0.0..=1.0).contains(&producer.violence_threshold) {
            return Err(ConfigError::Message(format!(
                "producer.violence_threshold must be within 0..=1, got {}",
                producer.violence_threshold
            )));
        }
        if !(0.0..=1.0).contains(&producer.activity_threshold) {
            return Err(ConfigError::Message(format!(
                "producer.activity_threshold must be within 0..=1, got {}",
                producer.activity_threshold
            )));
        }
        if producer.seen_capacity == 0 {
            return Err(ConfigError::Message(
                "producer.seen_capacity must be positive".to_string(),
            ));
        }
        if self.consumer.max_delivery_attempts == 0 {
            return Err(ConfigError::Message(
                "consumer.max_delivery_attempts must be positive".to_string(),
            ));
        }
        if self.resolver.min_delay_ms == 0 {
            return Err(ConfigError::Message(
                "resolver.min_delay_ms must be positive".to_string(),
            ));
        }
        let budget = self.single_place_budget();
        if Duration::from_secs(self.broker.visibility_timeout_secs) <= budget {
            return Err(ConfigError::Message(format!(
                "broker.visibility_timeout_secs must exceed the {}s it can take to resolve one place",
                budget.as_secs()
            )));
        }
        if self.broker.visibility_timeout_secs > MAX_VISIBILITY_TIMEOUT_SECS {
            return Err(ConfigError::Message(format!(
                "broker.visibility_timeout_secs must be at most {}",
                MAX_VISIBILITY_TIMEOUT_SECS
            )));
        }
        Ok(())
    }
}

/// Environment source shared by all loaders; list-valued keys are comma separated
fn environment() -> Environment {
    Environment::with_prefix("APP")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("producer.feeds")
        .with_list_parse_key("producer.activity_labels")
        .with_list_parse_key("resolver.place_labels")
        .with_list_parse_key("resolver.weapon_terms")
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            topic: default_topic(),
            queue_url: None,
            dlq_url: None,
            endpoint_url: None,
            region: None,
            fifo: false,
            poll_wait_secs: default_poll_wait(),
            visibility_timeout_secs: default_visibility_timeout(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            connect_timeout_secs: default_connect_timeout(),
            reconnect_backoff_secs: default_reconnect_backoff(),
        }
    }
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            feeds: default_feeds(),
            poll_interval_secs: default_poll_interval(),
            max_per_feed: default_max_per_feed(),
            violence_threshold: default_violence_threshold(),
            activity_threshold: default_activity_threshold(),
            activity_labels: Vec::new(),
            seen_capacity: default_seen_capacity(),
            feed_timeout_secs: default_feed_timeout(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            api_base: default_inference_base(),
            api_key: None,
            model: default_classifier_model(),
            timeout_secs: default_inference_timeout(),
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            ner_api_base: default_inference_base(),
            ner_api_key: None,
            ner_model: default_ner_model(),
            place_labels: default_place_labels(),
            geocoder_base: default_geocoder_base(),
            user_agent: default_user_agent(),
            min_delay_ms: default_geocode_min_delay(),
            max_retries: default_geocode_retries(),
            error_wait_ms: default_geocode_error_wait(),
            timeout_secs: default_inference_timeout(),
            weapon_terms: Vec::new(),
            weapon_terms_path: None,
        }
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_delivery_attempts: default_max_delivery_attempts(),
            default_language: default_language(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            database: DatabaseConfig::default(),
            producer: ProducerConfig::default(),
            classifier: ClassifierConfig::default(),
            resolver: ResolverConfig::default(),
            consumer: ConsumerConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}
