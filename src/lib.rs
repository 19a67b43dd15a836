pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod geo;
pub mod geocoding;
pub mod models;
pub mod observability;
pub mod polyline;
pub mod state;
pub mod store;
