//! Severity/activity classifier
//!
//! Wraps a zero-shot text classifier:
//! - one binary query (`violent` / `non-violent`) gives the violence score
//! - one multi-label query over the activity vocabulary gives the tags
//!
//! Model access sits behind [`ZeroShotClassifier`] so the HTTP inference
//! client can be swapped for a local model or a mock.

use crate::config::{ClassifierConfig, ProducerConfig};
use crate::errors::{AppError, Result};
use crate::models::SeverityBand;
use crate::text;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Label whose probability mass is the violence score
pub const VIOLENT_LABEL: &str = "violent";

/// Candidate labels of the violence query
pub const VIOLENCE_LABELS: [&str; 2] = [VIOLENT_LABEL, "non-violent"];

/// Labels and scores returned by a zero-shot query, in model order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZeroShotResult {
    pub labels: Vec<String>,
    pub scores: Vec<f64>,
}

impl ZeroShotResult {
    pub fn score_of(&self, label: &str) -> Option<f64> {
        self.labels
            .iter()
            .position(|l| l == label)
            .and_then(|i| self.scores.get(i).copied())
    }

    pub fn pairs(&self) -> impl Iterator<Item = (&str, f64)> {
        self.labels
            .iter()
            .map(String::as_str)
            .zip(self.scores.iter().copied())
    }
}

/// Trait for zero-shot text classification
#[async_trait]
pub trait ZeroShotClassifier: Send + Sync {
    /// Score `text` against `candidate_labels`. With `multi_label` each label
    /// is scored independently; otherwise the scores sum to one.
    async fn classify(
        &self,
        text: &str,
        candidate_labels: &[String],
        multi_label: bool,
    ) -> Result<ZeroShotResult>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Zero-shot classifier served by a Hugging Face style inference API
pub struct HttpZeroShotClassifier {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct InferenceRequest<'a> {
    inputs: &'a str,
    parameters: InferenceParameters<'a>,
    options: InferenceOptions,
}

#[derive(Serialize)]
struct InferenceParameters<'a> {
    candidate_labels: &'a [String],
    multi_label: bool,
}

#[derive(Serialize)]
struct InferenceOptions {
    wait_for_model: bool,
}

impl HttpZeroShotClassifier {
    /// Create a new inference client
    pub fn new(config: &ClassifierConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create classifier HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config.api_base.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ZeroShotClassifier for HttpZeroShotClassifier {
    async fn classify(
        &self,
        text: &str,
        candidate_labels: &[String],
        multi_label: bool,
    ) -> Result<ZeroShotResult> {
        let url = format!("{}/models/{}", self.base_url, self.model);

        let request = InferenceRequest {
            inputs: text,
            parameters: InferenceParameters {
                candidate_labels,
                multi_label,
            },
            options: InferenceOptions {
                wait_for_model: true,
            },
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| AppError::Classifier {
            message: format!("Request failed: {}", e),
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Classifier {
                message: format!("API error {}: {}", status, body),
            });
        }

        let result: ZeroShotResult = response.json().await.map_err(|e| AppError::Classifier {
            message: format!("Failed to parse response: {}", e),
        })?;

        if result.labels.len() != result.scores.len() {
            return Err(AppError::Classifier {
                message: format!(
                    "Mismatched response: {} labels, {} scores",
                    result.labels.len(),
                    result.scores.len()
                ),
            });
        }

        Ok(result)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Mock classifier for testing: fixed scores per label, optionally keyed by text
#[derive(Debug, Clone, Default)]
pub struct MockZeroShotClassifier {
    default_scores: HashMap<String, f64>,
    text_scores: Vec<(String, HashMap<String, f64>)>,
    failing: Vec<String>,
}

impl MockZeroShotClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Score returned for `label` when no text rule matches
    pub fn with_score(mut self, label: &str, score: f64) -> Self {
        self.default_scores.insert(label.to_string(), score);
        self
    }

    /// Scores returned when the input contains `needle`
    pub fn with_text_scores(mut self, needle: &str, scores: &[(&str, f64)]) -> Self {
        let scores = scores.iter().map(|(l, s)| (l.to_string(), *s)).collect();
        self.text_scores.push((needle.to_string(), scores));
        self
    }

    /// Fail every call whose input contains `needle`
    pub fn failing_on(mut self, needle: &str) -> Self {
        self.failing.push(needle.to_string());
        self
    }
}

#[async_trait]
impl ZeroShotClassifier for MockZeroShotClassifier {
    async fn classify(
        &self,
        text: &str,
        candidate_labels: &[String],
        _multi_label: bool,
    ) -> Result<ZeroShotResult> {
        if self.failing.iter().any(|needle| text.contains(needle.as_str())) {
            return Err(AppError::Classifier {
                message: "mock classifier failure".to_string(),
            });
        }

        let scores = self
            .text_scores
            .iter()
            .find(|(needle, _)| text.contains(needle.as_str()))
            .map(|(_, scores)| scores)
            .unwrap_or(&self.default_scores);

        Ok(ZeroShotResult {
            labels: candidate_labels.to_vec(),
            scores: candidate_labels
                .iter()
                .map(|l| scores.get(l).copied().unwrap_or(0.0))
                .collect(),
        })
    }

    fn model_name(&self) -> &str {
        "mock-zero-shot"
    }
}

/// Thresholds and vocabulary applied on top of the raw model
#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    pub violence_threshold: f64,
    pub activity_threshold: f64,
    pub activity_labels: Vec<String>,
}

impl From<&ProducerConfig> for ClassifierSettings {
    fn from(config: &ProducerConfig) -> Self {
        Self {
            violence_threshold: config.violence_threshold,
            activity_threshold: config.activity_threshold,
            activity_labels: config.activity_labels.clone(),
        }
    }
}

/// Score and tags of an item that cleared the violence threshold
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub violence_score: f64,
    pub severity_band: SeverityBand,
    /// Never empty
    pub activities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    BelowThreshold { violence_score: f64 },
    Alert(Classification),
}

/// Maps text to a violence verdict and activity tags
pub struct SeverityClassifier {
    model: Arc<dyn ZeroShotClassifier>,
    settings: ClassifierSettings,
    violence_labels: Vec<String>,
}

impl SeverityClassifier {
    pub fn new(model: Arc<dyn ZeroShotClassifier>, settings: ClassifierSettings) -> Self {
        Self {
            model,
            settings,
            violence_labels: VIOLENCE_LABELS.iter().map(|l| l.to_string()).collect(),
        }
    }

    pub fn settings(&self) -> &ClassifierSettings {
        &self.settings
    }

    /// Classify the first 512 characters of `text`.
    ///
    /// Errors only when the violence query fails; a failed activity query
    /// degrades to the `other` tag.
    pub async fn classify(&self, text: &str) -> Result<Verdict> {
        let snippet = text::snippet(text);

        let start = Instant::now();
        let result = self.model.classify(snippet, &self.violence_labels, false).await;
        let elapsed = start.elapsed().as_secs_f64();

        let violence_score = match result {
            Ok(result) => result.score_of(VIOLENT_LABEL).unwrap_or(0.0),
            Err(e) => {
                crate::metrics::record_classification(elapsed, "error");
                return Err(e);
            }
        };

        if violence_score < self.settings.violence_threshold {
            crate::metrics::record_classification(elapsed, "below_threshold");
            debug!(violence_score, "Below violence threshold");
            return Ok(Verdict::BelowThreshold { violence_score });
        }

        crate::metrics::record_classification(elapsed, "alert");
        let activities = self.tag_activities(snippet).await;

        Ok(Verdict::Alert(Classification {
            violence_score,
            severity_band: SeverityBand::from_score(violence_score),
            activities,
        }))
    }

    async fn tag_activities(&self, snippet: &str) -> Vec<String> {
        if self.settings.activity_labels.is_empty() {
            return vec![crate::OTHER_ACTIVITY.to_string()];
        }

        let activities: Vec<String> = match self
            .model
            .classify(snippet, &self.settings.activity_labels, true)
            .await
        {
            Ok(result) => result
                .pairs()
                .filter(|(_, score)| *score >= self.settings.activity_threshold)
                .map(|(label, _)| label.to_string())
                .collect(),
            Err(e) => {
                warn!(error = %e, model = %self.model.model_name(), "Activity tagging failed");
                Vec::new()
            }
        };

        if activities.is_empty() {
            vec![crate::OTHER_ACTIVITY.to_string()]
        } else {
            activities
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(labels: &[&str]) -> ClassifierSettings {
        ClassifierSettings {
            violence_threshold: 0.6,
            activity_threshold: 0.3,
            activity_labels: labels.iter().map(|l| l.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_alert_with_activities() {
        let model = MockZeroShotClassifier::new()
            .with_score("violent", 0.91)
            .with_score("civil-unrest", 0.8)
            .with_score("school", 0.1);
        let classifier = SeverityClassifier::new(Arc::new(model), settings(&["civil-unrest", "school"]));

        let verdict = classifier.classify("Riot breaks out in Lagos violence erupted").await.unwrap();
        assert_eq!(
            verdict,
            Verdict::Alert(Classification {
                violence_score: 0.91,
                severity_band: SeverityBand::High,
                activities: vec!["civil-unrest".to_string()],
            })
        );
    }

    #[tokio::test]
    async fn test_below_threshold() {
        let model = MockZeroShotClassifier::new().with_score("violent", 0.2);
        let classifier = SeverityClassifier::new(Arc::new(model), settings(&["school"]));

        let verdict = classifier.classify("Local bakery wins prize").await.unwrap();
        assert_eq!(verdict, Verdict::BelowThreshold { violence_score: 0.2 });
    }

    #[tokio::test]
    async fn test_threshold_is_inclusive() {
        let model = MockZeroShotClassifier::new().with_score("violent", 0.6);
        let classifier = SeverityClassifier::new(Arc::new(model), settings(&[]));

        match classifier.classify("Clashes reported").await.unwrap() {
            Verdict::Alert(c) => {
                assert_eq!(c.severity_band, SeverityBand::Low);
                assert_eq!(c.activities, vec!["other"]);
            }
            other => panic!("expected alert, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_no_activity_clears_threshold_yields_other() {
        let model = MockZeroShotClassifier::new()
            .with_score("violent", 0.75)
            .with_score("school", 0.29);
        let classifier = SeverityClassifier::new(Arc::new(model), settings(&["school"]));

        let Verdict::Alert(c) = classifier.classify("Attack").await.unwrap() else {
            panic!("expected alert");
        };
        assert_eq!(c.activities, vec!["other"]);
    }

    #[tokio::test]
    async fn test_violence_query_failure_propagates() {
        let model = MockZeroShotClassifier::new().failing_on("Attack");
        let classifier = SeverityClassifier::new(Arc::new(model), settings(&["school"]));

        let err = classifier.classify("Attack on school").await.unwrap_err();
        assert!(matches!(err, AppError::Classifier { .. }));
    }

    #[test]
    fn test_score_of_missing_label() {
        let result = ZeroShotResult {
            labels: vec!["non-violent".to_string()],
            scores: vec![0.9],
        };
        assert_eq!(result.score_of("violent"), None);
        assert_eq!(result.score_of("non-violent"), Some(0.9));
    }
}
