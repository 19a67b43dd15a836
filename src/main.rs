use std::sync::Arc;

use ride_coordinator::api;
use ride_coordinator::config::{Config, LogFormat};
use ride_coordinator::error::AppError;
use ride_coordinator::geocoding::google::HttpGeocoder;
use ride_coordinator::observability::metrics::Metrics;
use ride_coordinator::state::AppState;
use ride_coordinator::store::memory::InMemoryStore;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false);
    match config.log_format {
        LogFormat::Compact => subscriber.compact().init(),
        LogFormat::Json => subscriber.json().init(),
    }

    if config.maps_api_key.is_none() {
        tracing::warn!("MAPS_API_KEY not set; route resolution will fail");
    }

    let metrics = Metrics::new();
    let geocoder = HttpGeocoder::new(
        &config.maps_api_base_url,
        config.maps_api_key.clone(),
        config.geocoder_timeout,
        metrics.clone(),
    )?;
    let state = AppState::new(
        Arc::new(InMemoryStore::new()),
        Arc::new(geocoder),
        metrics,
        config.max_message_len,
    );

    let app = api::rest::router(Arc::new(state));

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
