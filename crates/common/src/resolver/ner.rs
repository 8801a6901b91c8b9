//! Named-entity recognition adapter

use crate::config::ResolverConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Entity span found in the input text (byte offsets)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognizedEntity {
    pub text: String,
    pub label: String,
    pub start: usize,
    pub end: usize,
}

/// Trait for named-entity recognition
#[async_trait]
pub trait EntityRecognizer: Send + Sync {
    /// Entities in order of appearance
    async fn recognize(&self, text: &str) -> Result<Vec<RecognizedEntity>>;
}

/// Token-classification model served by a Hugging Face style inference API
pub struct HttpEntityRecognizer {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct NerRequest<'a> {
    inputs: &'a str,
    parameters: NerParameters,
}

#[derive(Serialize)]
struct NerParameters {
    aggregation_strategy: &'static str,
}

#[derive(Deserialize)]
struct NerSpan {
    entity_group: String,
    word: String,
    start: Option<usize>,
    end: Option<usize>,
}

impl HttpEntityRecognizer {
    pub fn new(config: &ResolverConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create NER HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key: config.ner_api_key.clone(),
            model: config.ner_model.clone(),
            base_url: config.ner_api_base.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl EntityRecognizer for HttpEntityRecognizer {
    async fn recognize(&self, text: &str) -> Result<Vec<RecognizedEntity>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/models/{}", self.base_url, self.model);
        let request = NerRequest {
            inputs: text,
            parameters: NerParameters {
                aggregation_strategy: "simple",
            },
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| AppError::Recognizer {
            message: format!("Request failed: {}", e),
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Recognizer {
                message: format!("API error {}: {}", status, body),
            });
        }

        let spans: Vec<NerSpan> = response.json().await.map_err(|e| AppError::Recognizer {
            message: format!("Failed to parse response: {}", e),
        })?;

        Ok(spans_to_entities(text, spans))
    }
}

/// Byte offset of the `index`-th character, or `text.len()` just past the last one
fn char_to_byte(text: &str, index: usize) -> Option<usize> {
    text.char_indices()
        .map(|(byte, _)| byte)
        .chain(std::iter::once(text.len()))
        .nth(index)
}

/// Convert the model's character offsets to byte offsets, search forward from
/// the previous span when they are missing or unusable, and return the
/// entities ordered by position
fn spans_to_entities(text: &str, spans: Vec<NerSpan>) -> Vec<RecognizedEntity> {
    let mut cursor = 0;
    let mut entities = Vec::with_capacity(spans.len());

    for span in spans {
        let word = span.word.trim().to_string();
        if word.is_empty() {
            continue;
        }

        let offsets = match (span.start, span.end) {
            (Some(start), Some(end)) if start < end => {
                char_to_byte(text, start).zip(char_to_byte(text, end))
            }
            _ => None,
        };

        let (start, end) = match offsets {
            Some(found) => found,
            None => match text.get(cursor..).and_then(|rest| rest.find(&word)) {
                Some(offset) => (cursor + offset, cursor + offset + word.len()),
                None => continue,
            },
        };

        cursor = end;
        entities.push(RecognizedEntity {
            text: text[start..end].to_string(),
            label: span.entity_group,
            start,
            end,
        });
    }

    entities.sort_by_key(|e| e.start);
    entities
}

/// Mock recognizer: tags every occurrence of the configured terms
#[derive(Debug, Clone, Default)]
pub struct MockEntityRecognizer {
    terms: Vec<(String, String)>,
    fail: bool,
}

impl MockEntityRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, text: &str, label: &str) -> Self {
        self.terms.push((text.to_string(), label.to_string()));
        self
    }

    pub fn failing() -> Self {
        Self {
            terms: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl EntityRecognizer for MockEntityRecognizer {
    async fn recognize(&self, text: &str) -> Result<Vec<RecognizedEntity>> {
        if self.fail {
            return Err(AppError::Recognizer {
                message: "mock recognizer failure".to_string(),
            });
        }

        let mut entities: Vec<RecognizedEntity> = self
            .terms
            .iter()
            .flat_map(|(term, label)| {
                text.match_indices(term.as_str()).map(move |(start, m)| RecognizedEntity {
                    text: m.to_string(),
                    label: label.clone(),
                    start,
                    end: start + m.len(),
                })
            })
            .collect();

        entities.sort_by_key(|e| e.start);
        Ok(entities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(group: &str, word: &str, start: Option<usize>, end: Option<usize>) -> NerSpan {
        NerSpan {
            entity_group: group.to_string(),
            word: word.to_string(),
            start,
            end,
        }
    }

    #[test]
    fn test_spans_with_offsets() {
        let text = "Riot breaks out in Lagos";
        let entities = spans_to_entities(text, vec![span("LOC", "Lagos", Some(19), Some(24))]);
        assert_eq!(entities[0].text, "Lagos");
        assert_eq!(entities[0].label, "LOC");
    }

    #[test]
    fn test_character_offsets_after_non_ascii_text() {
        let text = "Café in Lagos";
        let entities = spans_to_entities(text, vec![span("LOC", "Lagos", Some(8), Some(13))]);
        assert_eq!(entities[0].text, "Lagos");
        assert_eq!(entities[0].start, 9);
        assert_eq!(entities[0].end, 14);

        let quoted = "“Riot” in Kano";
        let entities = spans_to_entities(quoted, vec![span("LOC", "Kano", Some(10), Some(14))]);
        assert_eq!(entities[0].text, "Kano");
    }

    #[test]
    fn test_out_of_range_offsets_fall_back_to_search() {
        let text = "Unrest in Abuja";
        let entities = spans_to_entities(text, vec![span("LOC", "Abuja", Some(40), Some(45))]);
        assert_eq!(entities[0].text, "Abuja");
        assert_eq!(entities[0].start, 10);
    }

    #[test]
    fn test_spans_without_offsets_are_located() {
        let text = "Police in Paris and Paris, Texas";
        let entities = spans_to_entities(
            text,
            vec![
                span("LOC", "Paris", None, None),
                span("LOC", "Paris", None, None),
                span("MISC", "Nowhere", None, None),
            ],
        );
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].start, 10);
        assert_eq!(entities[1].start, 20);
    }

    #[tokio::test]
    async fn test_mock_recognizer_orders_by_position() {
        let recognizer = MockEntityRecognizer::new()
            .with_entity("Lagos", "GPE")
            .with_entity("Police", "ORG");
        let entities = recognizer.recognize("Police in Lagos").await.unwrap();
        assert_eq!(entities[0].label, "ORG");
        assert_eq!(entities[1].label, "GPE");
    }
}
