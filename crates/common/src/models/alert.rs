//! News item, candidate alert and enriched alert records

use crate::errors::{AppError, Result};
use crate::models::geo::{Entity, GeoPoint};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A single entry pulled from a feed during one poll cycle
#[derive(Debug, Clone, PartialEq)]
pub struct NewsItem {
    /// Entry id, or the permalink when the feed carries no id
    pub external_id: String,
    pub source_name: String,
    pub title: String,
    pub raw_summary: String,
    pub published_at: Option<DateTime<Utc>>,
    pub language: Option<String>,
    pub image_url: Option<String>,
}

/// Coarse severity bucket derived from the violence score
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SeverityBand {
    Info,
    Low,
    Medium,
    High,
}

impl SeverityBand {
    /// Map a violence score to its band. Boundary values belong to the upper band.
    pub fn from_score(score: f64) -> Self {
        if score < 0.6 {
            SeverityBand::Info
        } else if score < 0.7 {
            SeverityBand::Low
        } else if score < 0.85 {
            SeverityBand::Medium
        } else {
            SeverityBand::High
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SeverityBand::Info => "info",
            SeverityBand::Low => "low",
            SeverityBand::Medium => "medium",
            SeverityBand::High => "high",
        }
    }
}

impl fmt::Display for SeverityBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SeverityBand {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "info" => Ok(SeverityBand::Info),
            "low" => Ok(SeverityBand::Low),
            "medium" => Ok(SeverityBand::Medium),
            "high" => Ok(SeverityBand::High),
            other => Err(AppError::InvalidFormat {
                message: format!("Unknown severity band: {}", other),
            }),
        }
    }
}

/// Wire message published by the producer, one JSON object per message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateAlert {
    pub id: String,
    pub source: String,
    pub title: String,
    /// Markup-stripped plain text
    pub summary: String,
    #[serde(
        rename = "published",
        default,
        deserialize_with = "deserialize_published"
    )]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(serialize_with = "serialize_score")]
    pub violence_score: f64,
    pub severity_band: SeverityBand,
    pub activities: Vec<String>,
    pub fetched_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl CandidateAlert {
    /// Serialize to the wire format
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(AppError::from)
    }

    /// Parse a wire payload. Malformed payloads are data errors, never retried.
    pub fn decode(payload: &str) -> Result<Self> {
        let alert: CandidateAlert =
            serde_json::from_str(payload).map_err(|e| AppError::InvalidPayload {
                message: e.to_string(),
            })?;

        if alert.id.trim().is_empty() {
            return Err(AppError::InvalidPayload {
                message: "alert id is empty".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&alert.violence_score) {
            return Err(AppError::InvalidPayload {
                message: format!("violence_score {} outside 0..=1", alert.violence_score),
            });
        }

        Ok(alert)
    }
}

/// Row persisted by the consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedAlert {
    pub id: String,
    pub source: String,
    pub title: String,
    pub summary: String,
    pub published_at: Option<DateTime<Utc>>,
    pub violence_score: f64,
    pub severity_band: SeverityBand,
    pub activities: Vec<String>,
    pub fetched_at: DateTime<Utc>,
    pub geom: Option<GeoPoint>,
    pub entities: Vec<Entity>,
    pub language: String,
    pub image_url: Option<String>,
}

impl EnrichedAlert {
    /// Combine a candidate with its enrichment. `summary` replaces the
    /// candidate's summary with the normalized text the entities came from.
    pub fn from_candidate(
        candidate: CandidateAlert,
        summary: String,
        geom: Option<GeoPoint>,
        entities: Vec<Entity>,
        default_language: &str,
    ) -> Self {
        let activities = if candidate.activities.is_empty() {
            vec![crate::OTHER_ACTIVITY.to_string()]
        } else {
            candidate.activities
        };

        Self {
            id: candidate.id,
            source: candidate.source,
            title: candidate.title,
            summary,
            published_at: candidate.published_at,
            violence_score: round_score(candidate.violence_score),
            severity_band: candidate.severity_band,
            activities,
            fetched_at: candidate.fetched_at,
            geom,
            entities,
            language: candidate
                .language
                .filter(|l| !l.trim().is_empty())
                .unwrap_or_else(|| default_language.to_string()),
            image_url: candidate.image_url,
        }
    }
}

/// Round to the 3 decimals carried on the wire
pub(crate) fn round_score(score: f64) -> f64 {
    (score * 1000.0).round() / 1000.0
}

fn serialize_score<S: Serializer>(score: &f64, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_f64(round_score(*score))
}

/// Accepts RFC 3339, RFC 2822 (as emitted by RSS feeds) or null.
/// Unparseable dates become `None` rather than failing the whole message.
fn deserialize_published<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_rfc2822(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candidate() -> CandidateAlert {
        CandidateAlert {
            id: "a1".to_string(),
            source: "Wire".to_string(),
            title: "Riot breaks out in Lagos".to_string(),
            summary: "violence erupted".to_string(),
            published_at: Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()),
            violence_score: 0.91234,
            severity_band: SeverityBand::High,
            activities: vec!["civil-unrest".to_string()],
            fetched_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 5, 0).unwrap(),
            language: None,
            image_url: None,
        }
    }

    #[test]
    fn test_severity_bands() {
        assert_eq!(SeverityBand::from_score(0.5), SeverityBand::Info);
        assert_eq!(SeverityBand::from_score(0.65), SeverityBand::Low);
        assert_eq!(SeverityBand::from_score(0.8), SeverityBand::Medium);
        assert_eq!(SeverityBand::from_score(0.9), SeverityBand::High);
    }

    #[test]
    fn test_severity_boundaries_resolve_upward() {
        assert_eq!(SeverityBand::from_score(0.6), SeverityBand::Low);
        assert_eq!(SeverityBand::from_score(0.7), SeverityBand::Medium);
        assert_eq!(SeverityBand::from_score(0.85), SeverityBand::High);
        assert_eq!(SeverityBand::from_score(0.0), SeverityBand::Info);
        assert_eq!(SeverityBand::from_score(1.0), SeverityBand::High);
    }

    #[test]
    fn test_wire_format_field_names() {
        let json: serde_json::Value =
            serde_json::from_str(&candidate().encode().unwrap()).unwrap();

        assert_eq!(json["id"], "a1");
        assert_eq!(json["severity_band"], "high");
        assert_eq!(json["violence_score"], 0.912);
        assert_eq!(json["published"], "2024-05-01T12:00:00Z");
        assert!(json.get("published_at").is_none());
        assert!(json.get("image_url").is_none());
    }

    #[test]
    fn test_decode_accepts_rss_dates_and_nulls() {
        let payload = r#"{"id":"x","source":"s","title":"t","summary":"",
            "published":"Wed, 01 May 2024 12:00:00 GMT","violence_score":0.7,
            "severity_band":"medium","activities":["other"],
            "fetched_at":"2024-05-01T12:05:00Z"}"#;
        let alert = CandidateAlert::decode(payload).unwrap();
        assert_eq!(
            alert.published_at,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
        );

        let payload = payload.replace(r#""Wed, 01 May 2024 12:00:00 GMT""#, "null");
        assert_eq!(CandidateAlert::decode(&payload).unwrap().published_at, None);
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(CandidateAlert::decode("not json").unwrap_err().is_data_error());

        let mut alert = candidate();
        alert.id = "  ".to_string();
        let err = CandidateAlert::decode(&alert.encode().unwrap()).unwrap_err();
        assert!(err.is_data_error());
    }

    #[test]
    fn test_enriched_defaults() {
        let mut c = candidate();
        c.activities.clear();
        let enriched = EnrichedAlert::from_candidate(c, "clean".to_string(), None, vec![], "en");

        assert_eq!(enriched.language, "en");
        assert_eq!(enriched.activities, vec!["other"]);
        assert_eq!(enriched.summary, "clean");
        assert_eq!(enriched.violence_score, 0.912);
    }
}
