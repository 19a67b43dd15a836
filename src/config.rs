use std::env;
use std::time::Duration;

use crate::error::AppError;

const DEFAULT_MAPS_API_BASE_URL: &str = "https://maps.googleapis.com/maps/api";

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub maps_api_base_url: String,
    pub maps_api_key: Option<String>,
    pub geocoder_timeout: Duration,
    pub max_message_len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format {other}, expected compact/json")),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let timeout_ms: u64 = parse_or_default("GEOCODER_TIMEOUT_MS", 5000)?;
        let max_message_len: usize = parse_or_default("MAX_MESSAGE_LEN", 1000)?;
        if max_message_len == 0 {
            return Err(AppError::Internal("invalid MAX_MESSAGE_LEN: must be > 0".to_string()));
        }

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format: parse_or_default("LOG_FORMAT", LogFormat::Compact)?,
            maps_api_base_url: env::var("MAPS_API_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_MAPS_API_BASE_URL.to_string()),
            maps_api_key: env::var("MAPS_API_KEY").ok().filter(|key| !key.trim().is_empty()),
            geocoder_timeout: Duration::from_millis(timeout_ms),
            max_message_len,
        })
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
