//! Geometry and entity types

use crate::errors::{AppError, Result};
use serde::{Deserialize, Serialize};

/// SRID of every stored point (WGS 84)
pub const SRID: i32 = 4326;

/// Longitude/latitude pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
}

impl GeoPoint {
    /// Create a point, rejecting coordinates outside the WGS 84 range
    pub fn new(lon: f64, lat: f64) -> Result<Self> {
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(AppError::InvalidFormat {
                message: format!("longitude {} out of range", lon),
            });
        }
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(AppError::InvalidFormat {
                message: format!("latitude {} out of range", lat),
            });
        }
        Ok(Self { lon, lat })
    }

    /// Well-known text, as accepted by `ST_GeomFromText`
    pub fn to_wkt(&self) -> String {
        format!("POINT({} {})", self.lon, self.lat)
    }

    /// Parse the output of `ST_AsText` for a point
    pub fn from_wkt(wkt: &str) -> Result<Self> {
        let invalid = || AppError::InvalidFormat {
            message: format!("not a WKT point: {}", wkt),
        };

        let body = wkt
            .trim()
            .strip_prefix("POINT")
            .map(str::trim_start)
            .and_then(|s| s.strip_prefix('('))
            .and_then(|s| s.strip_suffix(')'))
            .ok_or_else(invalid)?;

        let mut coords = body.split_whitespace().map(str::parse::<f64>);
        match (coords.next(), coords.next(), coords.next()) {
            (Some(Ok(lon)), Some(Ok(lat)), None) => GeoPoint::new(lon, lat),
            _ => Err(invalid()),
        }
    }
}

/// Named entity extracted from alert text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub text: String,
    pub label: String,
}

impl Entity {
    pub fn new(text: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            label: label.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wkt_round_trip() {
        let point = GeoPoint::new(3.38, 6.45).unwrap();
        let decoded = GeoPoint::from_wkt(&point.to_wkt()).unwrap();
        assert!((decoded.lon - 3.38).abs() < 1e-9);
        assert!((decoded.lat - 6.45).abs() < 1e-9);

        let point = GeoPoint::new(-122.419_415_5, 37.774_929_5).unwrap();
        assert_eq!(GeoPoint::from_wkt(&point.to_wkt()).unwrap(), point);
    }

    #[test]
    fn test_from_wkt_tolerates_spacing() {
        let point = GeoPoint::from_wkt("POINT (3.38 6.45)").unwrap();
        assert_eq!(point, GeoPoint { lon: 3.38, lat: 6.45 });
    }

    #[test]
    fn test_from_wkt_rejects_garbage() {
        assert!(GeoPoint::from_wkt("LINESTRING(0 0, 1 1)").is_err());
        assert!(GeoPoint::from_wkt("POINT(1)").is_err());
        assert!(GeoPoint::from_wkt("POINT(1 2 3)").is_err());
        assert!(GeoPoint::from_wkt("POINT(200 0)").is_err());
    }
}
