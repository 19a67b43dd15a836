//! Contract of the realtime data store that is the system of record.
//!
//! Records live under slash separated paths (`requests/{id}`). Writes to a
//! single path are atomic and visible to every read issued after the write
//! completes; nothing is ordered across paths. `conditional_set` is the only
//! compare-and-swap primitive and is what request transitions are built on.

pub mod memory;
pub mod paths;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// A write landed on the subscribed path or somewhere below it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub path: String,
}

/// Standing registration returned by [`DataStore::subscribe`]. Events carry no
/// payload; receivers re-read what they need, so bursts may be coalesced.
pub struct Subscription {
    pub id: SubscriptionId,
    pub events: mpsc::UnboundedReceiver<ChangeEvent>,
}

#[async_trait]
pub trait DataStore: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<Value>, AppError>;

    async fn set(&self, path: &str, value: Value) -> Result<(), AppError>;

    /// Allocates a fresh child key under `path`. Nothing is written.
    async fn push(&self, path: &str) -> Result<String, AppError>;

    /// Direct children of `path` in insertion order.
    async fn list(&self, path: &str) -> Result<Vec<(String, Value)>, AppError>;

    async fn query_by_index(
        &self,
        path: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Value>, AppError>;

    /// Replaces the value at `path` with `value` only if it currently equals
    /// `expected`, evaluated atomically by the store. Returns whether the write
    /// happened.
    async fn conditional_set(
        &self,
        path: &str,
        expected: &Value,
        value: Value,
    ) -> Result<bool, AppError>;

    async fn subscribe(&self, path: &str) -> Result<Subscription, AppError>;

    async fn cancel(&self, id: SubscriptionId) -> Result<(), AppError>;
}
