use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use crate::engine::lifecycle::RequestLifecycle;
use crate::engine::listener::Listener;
use crate::error::AppError;
use crate::geo::{haversine_km, path_length_km};
use crate::geocoding::{Geocoder, RouteLeg};
use crate::models::identity::{Identity, Role};
use crate::models::location::{ConductorLocation, GeoPoint, PointLocation};
use crate::models::request::{RequestStatus, TripRequest};
use crate::observability::metrics::Metrics;
use crate::polyline;
use crate::store::{paths, DataStore};

#[derive(Debug, Clone, Serialize)]
pub struct TripRoute {
    pub request_id: String,
    pub pickup: PointLocation,
    pub destination: PointLocation,
    pub points: Vec<GeoPoint>,
    pub legs: Vec<RouteLeg>,
    pub distance_meters: u64,
    pub duration_seconds: u64,
    pub path_length_km: f64,
    pub conductor_distance_km: Option<f64>,
}

pub struct LocationTracker {
    store: Arc<dyn DataStore>,
    lifecycle: Arc<RequestLifecycle>,
    geocoder: Arc<dyn Geocoder>,
    metrics: Metrics,
}

impl LocationTracker {
    pub fn new(
        store: Arc<dyn DataStore>,
        lifecycle: Arc<RequestLifecycle>,
        geocoder: Arc<dyn Geocoder>,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            lifecycle,
            geocoder,
            metrics,
        }
    }

    pub async fn update_location(
        &self,
        identity: &Identity,
        point: GeoPoint,
    ) -> Result<ConductorLocation, AppError> {
        identity.require_role(Role::Conductor)?;
        point.validate()?;

        let location = ConductorLocation {
            conductor_id: identity.user_id.clone(),
            lat: point.lat,
            lng: point.lng,
            updated_at: Utc::now(),
        };

        self.store
            .set(
                &paths::conductor_location(&identity.user_id)?,
                serde_json::to_value(&location)?,
            )
            .await?;

        debug!(conductor_id = %location.conductor_id, lat = location.lat, lng = location.lng, "location updated");
        Ok(location)
    }

    pub async fn get_conductor_location(
        &self,
        conductor_id: &str,
    ) -> Result<Option<ConductorLocation>, AppError> {
        load_location(self.store.as_ref(), conductor_id).await
    }

    pub async fn locate_conductor_for(
        &self,
        identity: &Identity,
        request_id: &str,
    ) -> Result<Option<ConductorLocation>, AppError> {
        let request = self.lifecycle.get(request_id).await?;
        let conductor_id = accepted_conductor(&request)?;

        if !request.is_rider(&identity.user_id) {
            return Err(AppError::Forbidden(format!(
                "only the rider of request {request_id} may track its conductor"
            )));
        }

        self.get_conductor_location(conductor_id).await
    }

    pub async fn watch_conductor_location<U>(
        &self,
        conductor_id: &str,
        on_update: U,
    ) -> Result<Listener, AppError>
    where
        U: Fn(Option<ConductorLocation>) + Send + 'static,
    {
        let subscription = self
            .store
            .subscribe(&paths::conductor_location(conductor_id)?)
            .await?;
        info!(
            conductor_id,
            subscription_id = subscription.id.0,
            "location listener registered"
        );

        let store = self.store.clone();
        let conductor_id = conductor_id.to_string();
        Ok(Listener::spawn(
            self.store.clone(),
            self.metrics.clone(),
            subscription,
            move || {
                let store = store.clone();
                let conductor_id = conductor_id.clone();
                async move { load_location(store.as_ref(), &conductor_id).await }
            },
            on_update,
        ))
    }

    pub async fn resolve_route_points(
        &self,
        request_id: &str,
    ) -> Result<[PointLocation; 2], AppError> {
        let request = self.lifecycle.get(request_id).await?;
        self.resolve_points(&request).await
    }

    pub fn decode_route(&self, encoded: &str) -> Result<Vec<GeoPoint>, AppError> {
        polyline::decode(encoded)
    }

    pub async fn fetch_route(
        &self,
        identity: &Identity,
        request_id: &str,
    ) -> Result<TripRoute, AppError> {
        let request = self.lifecycle.get(request_id).await?;
        request.require_participant(identity)?;

        let [pickup, destination] = self.resolve_points(&request).await?;
        let directions = self
            .geocoder
            .route(pickup.point(), destination.point())
            .await?;
        let points = self.decode_route(&directions.encoded_polyline)?;

        let conductor_distance_km = match accepted_conductor(&request) {
            Ok(conductor_id) => self
                .get_conductor_location(conductor_id)
                .await?
                .map(|location| haversine_km(location.point(), pickup.point())),
            Err(_) => None,
        };

        Ok(TripRoute {
            request_id: request.id,
            distance_meters: directions.distance_meters(),
            duration_seconds: directions.duration_seconds(),
            path_length_km: path_length_km(&points),
            legs: directions.legs,
            pickup,
            destination,
            points,
            conductor_distance_km,
        })
    }

    async fn resolve_points(&self, request: &TripRequest) -> Result<[PointLocation; 2], AppError> {
        let (pickup, destination) = futures::try_join!(
            self.resolve(&request.pickup),
            self.resolve(&request.destination),
        )?;
        Ok([pickup, destination])
    }

    async fn resolve(&self, address: &str) -> Result<PointLocation, AppError> {
        match self.geocoder.geocode(address).await {
            Ok(point) => Ok(PointLocation::from_point(point, address)),
            Err(err) if err.is_retryable() => Err(err),
            Err(AppError::GeocodingFailed(reason)) => Err(AppError::GeocodingFailed(reason)),
            Err(err) => Err(AppError::GeocodingFailed(format!("{address:?}: {err}"))),
        }
    }
}

fn accepted_conductor(request: &TripRequest) -> Result<&str, AppError> {
    match (request.status, request.accepted_by.as_deref()) {
        (RequestStatus::Accepted, Some(conductor_id)) => Ok(conductor_id),
        (status, _) => Err(AppError::InvalidTransition {
            from: status,
            to: RequestStatus::Accepted,
        }),
    }
}

async fn load_location(
    store: &dyn DataStore,
    conductor_id: &str,
) -> Result<Option<ConductorLocation>, AppError> {
    store
        .get(&paths::conductor_location(conductor_id)?)
        .await?
        .map(|raw| serde_json::from_value(raw).map_err(AppError::from))
        .transpose()
}
