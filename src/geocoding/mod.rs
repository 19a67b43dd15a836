pub mod fixed;
pub mod google;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::location::GeoPoint;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouteLeg {
    pub distance_meters: u64,
    pub duration_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DirectionsRoute {
    pub encoded_polyline: String,
    pub legs: Vec<RouteLeg>,
}

impl DirectionsRoute {
    pub fn distance_meters(&self) -> u64 {
        self.legs.iter().map(|leg| leg.distance_meters).sum()
    }

    pub fn duration_seconds(&self) -> u64 {
        self.legs.iter().map(|leg| leg.duration_seconds).sum()
    }
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, address: &str) -> Result<GeoPoint, AppError>;

    async fn route(&self, origin: GeoPoint, destination: GeoPoint)
    -> Result<DirectionsRoute, AppError>;
}
