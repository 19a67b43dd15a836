use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::geocoding::{DirectionsRoute, Geocoder, RouteLeg};
use crate::models::location::GeoPoint;
use crate::observability::metrics::Metrics;

pub struct HttpGeocoder {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    metrics: Metrics,
}

impl HttpGeocoder {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
        metrics: Metrics,
    ) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AppError::Internal(format!("failed to build http client: {err}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            metrics,
        })
    }

    fn api_key(&self) -> Result<&str, AppError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| AppError::GeocodingFailed("MAPS_API_KEY is not configured".to_string()))
    }

    async fn fetch<T>(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<T, AppError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let url = format!("{}/{endpoint}/json", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|err| AppError::StoreUnavailable(format!("{endpoint} request failed: {err}")))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(AppError::StoreUnavailable(format!(
                "{endpoint} service returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(AppError::GeocodingFailed(format!(
                "{endpoint} service returned {status}"
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|err| AppError::GeocodingFailed(format!("unreadable {endpoint} response: {err}")))
    }

    fn observe(&self, outcome: &str, started: Instant) {
        self.metrics
            .geocode_latency_seconds
            .with_label_values(&[outcome])
            .observe(started.elapsed().as_secs_f64());
    }
}

#[async_trait]
impl Geocoder for HttpGeocoder {
    async fn geocode(&self, address: &str) -> Result<GeoPoint, AppError> {
        let started = Instant::now();
        let key = self.api_key()?;

        let result = self
            .fetch::<GeocodeResponse>("geocode", &[("address", address), ("key", key)])
            .await
            .and_then(|response| response.into_point(address));

        match &result {
            Ok(point) => {
                debug!(address, lat = point.lat, lng = point.lng, "address geocoded");
                self.observe("success", started);
            }
            Err(err) => {
                warn!(address, error = %err, "geocoding failed");
                self.observe("error", started);
            }
        }
        result
    }

    async fn route(
        &self,
        origin: GeoPoint,
        destination: GeoPoint,
    ) -> Result<DirectionsRoute, AppError> {
        let key = self.api_key()?;
        let origin = format!("{},{}", origin.lat, origin.lng);
        let destination = format!("{},{}", destination.lat, destination.lng);

        self.fetch::<DirectionsResponse>(
            "directions",
            &[
                ("origin", origin.as_str()),
                ("destination", destination.as_str()),
                ("key", key),
            ],
        )
        .await?
        .into_route()
    }
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: LatLng,
}

#[derive(Debug, Deserialize)]
struct LatLng {
    lat: f64,
    lng: f64,
}

#[derive(Debug, Deserialize)]
struct DirectionsResponse {
    status: String,
    #[serde(default)]
    routes: Vec<DirectionsRouteBody>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DirectionsRouteBody {
    overview_polyline: OverviewPolyline,
    #[serde(default)]
    legs: Vec<LegBody>,
}

#[derive(Debug, Deserialize)]
struct OverviewPolyline {
    points: String,
}

#[derive(Debug, Deserialize)]
struct LegBody {
    distance: TextValue,
    duration: TextValue,
}

#[derive(Debug, Deserialize)]
struct TextValue {
    value: u64,
}

fn status_error(status: &str, error_message: Option<String>) -> AppError {
    let detail = error_message.unwrap_or_default();
    match status {
        // transient on the provider side
        "OVER_QUERY_LIMIT" | "UNKNOWN_ERROR" => {
            AppError::StoreUnavailable(format!("maps api {status} {detail}"))
        }
        _ => AppError::GeocodingFailed(format!("maps api {status} {detail}")),
    }
}

impl GeocodeResponse {
    fn into_point(self, address: &str) -> Result<GeoPoint, AppError> {
        if self.status != "OK" {
            return Err(status_error(&self.status, self.error_message));
        }

        self.results
            .into_iter()
            .next()
            .map(|result| GeoPoint::new(result.geometry.location.lat, result.geometry.location.lng))
            .ok_or_else(|| AppError::GeocodingFailed(format!("no result for {address:?}")))
    }
}

impl DirectionsResponse {
    fn into_route(self) -> Result<DirectionsRoute, AppError> {
        if self.status != "OK" {
            return Err(status_error(&self.status, self.error_message));
        }

        let route = self
            .routes
            .into_iter()
            .next()
            .ok_or_else(|| AppError::GeocodingFailed("directions returned no routes".to_string()))?;

        Ok(DirectionsRoute {
            encoded_polyline: route.overview_polyline.points,
            legs: route
                .legs
                .into_iter()
                .map(|leg| RouteLeg {
                    distance_meters: leg.distance.value,
                    duration_seconds: leg.duration.value,
                })
                .collect(),
        })
    }
}
