use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(AppError::BadRequest(format!(
                "latitude {} outside [-90, 90]",
                self.lat
            )));
        }

        if !(-180.0..=180.0).contains(&self.lng) {
            return Err(AppError::BadRequest(format!(
                "longitude {} outside [-180, 180]",
                self.lng
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConductorLocation {
    pub conductor_id: String,
    pub lat: f64,
    pub lng: f64,
    pub updated_at: DateTime<Utc>,
}

impl ConductorLocation {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PointLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub address: String,
}

impl PointLocation {
    pub fn from_point(point: GeoPoint, address: impl Into<String>) -> Self {
        Self {
            latitude: point.lat,
            longitude: point.lng,
            address: address.into(),
        }
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}
