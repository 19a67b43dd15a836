use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, put};
use axum::Json;
use axum::Router;

use crate::engine::tracker::TripRoute;
use crate::error::AppError;
use crate::models::identity::{Identity, Role};
use crate::models::location::{ConductorLocation, GeoPoint};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/conductors/me/location", put(update_location))
        .route("/conductors/:id/location", get(get_location))
        .route("/requests/:id/conductor-location", get(conductor_location_for_request))
        .route("/requests/:id/route", get(trip_route))
}

async fn update_location(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(payload): Json<GeoPoint>,
) -> Result<Json<ConductorLocation>, AppError> {
    let location = state.tracker.update_location(&identity, payload).await?;
    Ok(Json(location))
}

async fn get_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    identity: Identity,
) -> Result<Json<Option<ConductorLocation>>, AppError> {
    if identity.user_id != id && identity.role != Role::Owner {
        return Err(AppError::Forbidden(format!(
            "user {} cannot read the location of {id}",
            identity.user_id
        )));
    }

    let location = state.tracker.get_conductor_location(&id).await?;
    Ok(Json(location))
}

async fn conductor_location_for_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    identity: Identity,
) -> Result<Json<Option<ConductorLocation>>, AppError> {
    let location = state.tracker.locate_conductor_for(&identity, &id).await?;
    Ok(Json(location))
}

async fn trip_route(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    identity: Identity,
) -> Result<Json<TripRoute>, AppError> {
    let route = state.tracker.fetch_route(&identity, &id).await?;
    Ok(Json(route))
}
