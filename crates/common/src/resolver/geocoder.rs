//! Geocoding adapter with a process-wide rate limit

use crate::config::ResolverConfig;
use crate::errors::{AppError, Result};
use crate::models::GeoPoint;
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Trait for place-name lookup
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// `Ok(None)` when the provider has no match for `query`
    async fn lookup(&self, query: &str) -> Result<Option<GeoPoint>>;
}

/// Nominatim search API client
pub struct NominatimGeocoder {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
}

impl NominatimGeocoder {
    pub fn new(config: &ResolverConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create geocoder HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: config.geocoder_base.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn lookup(&self, query: &str) -> Result<Option<GeoPoint>> {
        let url = format!("{}/search", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("q", query),
                ("format", "jsonv2"),
                ("limit", "1"),
                ("addressdetails", "0"),
                ("accept-language", "en"),
            ])
            .send()
            .await
            .map_err(|e| AppError::Geocoder {
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            return Err(AppError::Geocoder {
                message: format!("Geocoder returned {}", response.status()),
            });
        }

        let places: Vec<NominatimPlace> = response.json().await.map_err(|e| AppError::Geocoder {
            message: format!("Failed to parse response: {}", e),
        })?;

        let Some(place) = places.into_iter().next() else {
            return Ok(None);
        };

        let lon = place.lon.parse::<f64>();
        let lat = place.lat.parse::<f64>();
        match (lon, lat) {
            (Ok(lon), Ok(lat)) => GeoPoint::new(lon, lat).map(Some),
            _ => Err(AppError::Geocoder {
                message: format!("Unparseable coordinates {} {}", place.lon, place.lat),
            }),
        }
    }
}

/// Wraps a geocoder with a shared rate limit and fixed-wait retries.
///
/// Every attempt, retries included, waits for the limiter, so all lookups
/// in the process are serialized to one per `min_delay`.
pub struct RateLimitedGeocoder {
    inner: Arc<dyn Geocoder>,
    limiter: Arc<DefaultDirectRateLimiter>,
    max_retries: u32,
    error_wait: Duration,
}

impl RateLimitedGeocoder {
    pub fn new(
        inner: Arc<dyn Geocoder>,
        min_delay: Duration,
        max_retries: u32,
        error_wait: Duration,
    ) -> Result<Self> {
        let quota = Quota::with_period(min_delay).ok_or_else(|| AppError::Configuration {
            message: "geocoder min delay must be positive".to_string(),
        })?;

        Ok(Self {
            inner,
            limiter: Arc::new(RateLimiter::direct(quota)),
            max_retries,
            error_wait,
        })
    }

    pub fn from_config(inner: Arc<dyn Geocoder>, config: &ResolverConfig) -> Result<Self> {
        Self::new(
            inner,
            Duration::from_millis(config.min_delay_ms),
            config.max_retries,
            Duration::from_millis(config.error_wait_ms),
        )
    }
}

#[async_trait]
impl Geocoder for RateLimitedGeocoder {
    async fn lookup(&self, query: &str) -> Result<Option<GeoPoint>> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.error_wait).await;
            }

            self.limiter.until_ready().await;
            let start = Instant::now();
            let result = self.inner.lookup(query).await;
            let elapsed = start.elapsed().as_secs_f64();

            match result {
                Ok(point) => {
                    crate::metrics::record_geocode(elapsed, if point.is_some() { "hit" } else { "miss" });
                    debug!(query, found = point.is_some(), "Geocode lookup finished");
                    return Ok(point);
                }
                Err(e) => {
                    crate::metrics::record_geocode(elapsed, "error");
                    warn!(
                        query,
                        attempt = attempt + 1,
                        max_attempts = self.max_retries + 1,
                        error = %e,
                        "Geocode lookup failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AppError::Geocoder {
            message: "Unknown error after retries".to_string(),
        }))
    }
}

/// Scripted answer for [`MockGeocoder`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockAnswer {
    Found(GeoPoint),
    NotFound,
    Fail,
}

/// Mock geocoder for testing. Each query plays its script in order and
/// repeats the last answer; unknown queries are not found.
#[derive(Debug, Default)]
pub struct MockGeocoder {
    scripts: Mutex<HashMap<String, Vec<MockAnswer>>>,
    calls: Mutex<Vec<String>>,
}

impl MockGeocoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(self, query: &str, answers: Vec<MockAnswer>) -> Self {
        self.scripts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(query.to_string(), answers);
        self
    }

    pub fn with_place(self, query: &str, lon: f64, lat: f64) -> Self {
        self.with_script(query, vec![MockAnswer::Found(GeoPoint { lon, lat })])
    }

    /// Queries received so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl Geocoder for MockGeocoder {
    async fn lookup(&self, query: &str) -> Result<Option<GeoPoint>> {
        self.calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(query.to_string());

        let answer = {
            let mut scripts = self.scripts.lock().unwrap_or_else(|p| p.into_inner());
            match scripts.get_mut(query) {
                Some(script) if script.len() > 1 => script.remove(0),
                Some(script) => script.first().copied().unwrap_or(MockAnswer::NotFound),
                None => MockAnswer::NotFound,
            }
        };

        match answer {
            MockAnswer::Found(point) => Ok(Some(point)),
            MockAnswer::NotFound => Ok(None),
            MockAnswer::Fail => Err(AppError::Geocoder {
                message: "mock geocoder failure".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limited(mock: Arc<MockGeocoder>, min_delay_ms: u64) -> RateLimitedGeocoder {
        RateLimitedGeocoder::new(
            mock,
            Duration::from_millis(min_delay_ms),
            2,
            Duration::from_millis(1),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let mock = Arc::new(MockGeocoder::new().with_script(
            "Lagos",
            vec![
                MockAnswer::Fail,
                MockAnswer::Fail,
                MockAnswer::Found(GeoPoint { lon: 3.38, lat: 6.45 }),
            ],
        ));
        let geocoder = limited(mock.clone(), 1);

        let point = geocoder.lookup("Lagos").await.unwrap();
        assert_eq!(point, Some(GeoPoint { lon: 3.38, lat: 6.45 }));
        assert_eq!(mock.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_two_retries() {
        let mock = Arc::new(MockGeocoder::new().with_script("Lagos", vec![MockAnswer::Fail]));
        let geocoder = limited(mock.clone(), 1);

        assert!(geocoder.lookup("Lagos").await.is_err());
        assert_eq!(mock.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let mock = Arc::new(MockGeocoder::new());
        let geocoder = limited(mock.clone(), 1);

        assert_eq!(geocoder.lookup("Atlantis").await.unwrap(), None);
        assert_eq!(mock.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_spaces_calls() {
        let mock = Arc::new(MockGeocoder::new());
        let geocoder = limited(mock, 40);

        let start = std::time::Instant::now();
        for _ in 0..3 {
            geocoder.lookup("Nowhere").await.unwrap();
        }
        // First call passes immediately, the next two wait one period each
        assert!(start.elapsed() >= Duration::from_millis(70));
    }

    #[test]
    fn test_zero_delay_rejected() {
        let mock = Arc::new(MockGeocoder::new());
        assert!(RateLimitedGeocoder::new(mock, Duration::ZERO, 2, Duration::ZERO).is_err());
    }
}
