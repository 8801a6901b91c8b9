//! Location and entity resolution
//!
//! Turns alert text into an ordered entity list plus the coordinates of the
//! first place entity the geocoder can resolve. Resolution never fails:
//! recognizer and geocoder errors degrade to fewer entities or no point.

pub mod geocoder;
pub mod ner;
pub mod ruler;

pub use geocoder::{Geocoder, MockAnswer, MockGeocoder, NominatimGeocoder, RateLimitedGeocoder};
pub use ner::{EntityRecognizer, HttpEntityRecognizer, MockEntityRecognizer, RecognizedEntity};
pub use ruler::EntityRuler;

use crate::config::ResolverConfig;
use crate::errors::Result;
use crate::models::{Entity, GeoPoint};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Outcome of resolving one text
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    pub geom: Option<GeoPoint>,
    pub entities: Vec<Entity>,
}

/// Trait for text to location resolution
#[async_trait]
pub trait LocationResolver: Send + Sync {
    async fn resolve(&self, text: &str) -> Resolution;
}

/// Ruler + NER + geocoder pipeline
pub struct Resolver {
    ruler: EntityRuler,
    recognizer: Arc<dyn EntityRecognizer>,
    geocoder: Arc<dyn Geocoder>,
    place_labels: Vec<String>,
}

impl Resolver {
    pub fn new(
        ruler: EntityRuler,
        recognizer: Arc<dyn EntityRecognizer>,
        geocoder: Arc<dyn Geocoder>,
        place_labels: Vec<String>,
    ) -> Self {
        Self {
            ruler,
            recognizer,
            geocoder,
            place_labels,
        }
    }

    /// HTTP recognizer and a rate-limited Nominatim geocoder
    pub fn from_config(config: &ResolverConfig) -> Result<Self> {
        let ruler = EntityRuler::from_config(config)?;
        let recognizer = Arc::new(HttpEntityRecognizer::new(config)?);
        let nominatim: Arc<dyn Geocoder> = Arc::new(NominatimGeocoder::new(config)?);
        let geocoder = Arc::new(RateLimitedGeocoder::from_config(nominatim, config)?);

        Ok(Self::new(ruler, recognizer, geocoder, config.place_labels.clone()))
    }

    fn is_place(&self, entity: &RecognizedEntity) -> bool {
        self.place_labels.iter().any(|l| l.eq_ignore_ascii_case(&entity.label))
    }

    /// Ruler spans first, then model spans that do not overlap them
    async fn entities(&self, text: &str) -> Vec<RecognizedEntity> {
        let mut merged = self.ruler.find(text);

        match self.recognizer.recognize(text).await {
            Ok(spans) => {
                let ruled = merged.clone();
                merged.extend(
                    spans
                        .into_iter()
                        .filter(|s| !ruled.iter().any(|r| r.start < s.end && s.start < r.end)),
                );
            }
            Err(e) => {
                warn!(error = %e, "Entity recognition failed, using rule matches only");
            }
        }

        merged.sort_by_key(|e| e.start);
        merged
    }

    /// First place entity that geocodes. Lookup errors move on to the next
    /// candidate; each distinct place text is looked up once.
    async fn locate(&self, entities: &[RecognizedEntity]) -> Option<GeoPoint> {
        let mut tried = HashSet::new();

        for entity in entities.iter().filter(|e| self.is_place(e)) {
            if !tried.insert(entity.text.to_lowercase()) {
                continue;
            }

            match self.geocoder.lookup(&entity.text).await {
                Ok(Some(point)) => {
                    debug!(place = %entity.text, lon = point.lon, lat = point.lat, "Location resolved");
                    return Some(point);
                }
                Ok(None) => {
                    debug!(place = %entity.text, "No geocode match");
                }
                Err(e) => {
                    warn!(place = %entity.text, error = %e, "Geocoding gave up, trying next place");
                }
            }
        }

        None
    }
}

#[async_trait]
impl LocationResolver for Resolver {
    #[instrument(skip(self, text), fields(text_len = text.len()))]
    async fn resolve(&self, text: &str) -> Resolution {
        let recognized = self.entities(text).await;
        let geom = self.locate(&recognized).await;

        Resolution {
            geom,
            entities: recognized
                .into_iter()
                .map(|e| Entity::new(e.text, e.label))
                .collect(),
        }
    }
}
