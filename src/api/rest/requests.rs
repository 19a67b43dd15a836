use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::identity::Identity;
use crate::models::request::{NewTripRequest, TripRequest};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/requests", post(create_request).get(list_requests))
        .route("/requests/:id", get(get_request))
        .route("/requests/:id/accept", post(accept_request))
        .route("/requests/:id/reject", post(reject_request))
        .route("/requests/:id/otp", post(verify_otp))
}

#[derive(Deserialize)]
pub struct VerifyOtpRequest {
    pub code: String,
}

#[derive(Serialize)]
pub struct VerifyOtpResponse {
    pub verified: bool,
}

async fn create_request(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(payload): Json<NewTripRequest>,
) -> Result<Json<TripRequest>, AppError> {
    let request = state.lifecycle.create_request(&identity, payload).await?;
    Ok(Json(request))
}

async fn list_requests(
    State(state): State<Arc<AppState>>,
    identity: Identity,
) -> Result<Json<Vec<TripRequest>>, AppError> {
    let requests = state
        .lifecycle
        .list_requests_for_user(&identity)
        .await?
        .iter()
        .map(|request| request.view_for(&identity))
        .collect();

    Ok(Json(requests))
}

async fn get_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    identity: Identity,
) -> Result<Json<TripRequest>, AppError> {
    let request = state.lifecycle.get(&id).await?;
    Ok(Json(request.view_for(&identity)))
}

async fn accept_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    identity: Identity,
) -> Result<Json<TripRequest>, AppError> {
    let request = state.lifecycle.accept(&identity, &id).await?;
    Ok(Json(request.view_for(&identity)))
}

async fn reject_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    identity: Identity,
) -> Result<Json<TripRequest>, AppError> {
    let request = state.lifecycle.reject(&identity, &id).await?;
    Ok(Json(request.view_for(&identity)))
}

async fn verify_otp(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    identity: Identity,
    Json(payload): Json<VerifyOtpRequest>,
) -> Result<Json<VerifyOtpResponse>, AppError> {
    state
        .lifecycle
        .verify_otp(&identity, &id, &payload.code)
        .await?;
    Ok(Json(VerifyOtpResponse { verified: true }))
}
