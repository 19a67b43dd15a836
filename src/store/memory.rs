use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::error::AppError;
use crate::store::paths::{is_within, split_parent, validate_path};
use crate::store::{ChangeEvent, DataStore, Subscription, SubscriptionId};

struct Watcher {
    path: String,
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

pub struct InMemoryStore {
    values: DashMap<String, Value>,
    children: DashMap<String, Vec<String>>,
    watchers: DashMap<SubscriptionId, Watcher>,
    next_subscription: AtomicU64,
    online: AtomicBool,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            values: DashMap::new(),
            children: DashMap::new(),
            watchers: DashMap::new(),
            next_subscription: AtomicU64::new(1),
            online: AtomicBool::new(true),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn subscription_count(&self) -> usize {
        self.watchers.len()
    }

    fn ensure_online(&self) -> Result<(), AppError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AppError::StoreUnavailable("store is offline".to_string()))
        }
    }

    fn link_child(&self, path: &str) {
        if let Some((parent, key)) = split_parent(path) {
            self.children
                .entry(parent.to_string())
                .or_default()
                .push(key.to_string());
        }
    }

    fn notify(&self, path: &str) {
        let mut closed = Vec::new();

        for watcher in self.watchers.iter() {
            if !is_within(path, &watcher.path) {
                continue;
            }
            let event = ChangeEvent {
                path: path.to_string(),
            };
            if watcher.tx.send(event).is_err() {
                closed.push(*watcher.key());
            }
        }

        for id in closed {
            debug!(subscription_id = id.0, "dropping subscription with closed receiver");
            self.watchers.remove(&id);
        }
    }
}

#[async_trait]
impl DataStore for InMemoryStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, AppError> {
        self.ensure_online()?;
        validate_path(path)?;

        Ok(self.values.get(path).map(|entry| entry.value().clone()))
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), AppError> {
        self.ensure_online()?;
        validate_path(path)?;

        let created = match self.values.entry(path.to_string()) {
            Entry::Occupied(mut entry) => {
                entry.insert(value);
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(value);
                true
            }
        };

        if created {
            self.link_child(path);
        }
        self.notify(path);

        Ok(())
    }

    async fn push(&self, path: &str) -> Result<String, AppError> {
        self.ensure_online()?;
        validate_path(path)?;

        Ok(Uuid::new_v4().to_string())
    }

    async fn list(&self, path: &str) -> Result<Vec<(String, Value)>, AppError> {
        self.ensure_online()?;
        validate_path(path)?;

        let keys = match self.children.get(path) {
            Some(keys) => keys.value().clone(),
            None => return Ok(Vec::new()),
        };

        let listed = keys
            .into_iter()
            .filter_map(|key| {
                let value = self.values.get(&format!("{path}/{key}"))?.value().clone();
                Some((key, value))
            })
            .collect();

        Ok(listed)
    }

    async fn query_by_index(
        &self,
        path: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Value>, AppError> {
        let matches = self
            .list(path)
            .await?
            .into_iter()
            .map(|(_, child)| child)
            .filter(|child| child.get(field) == Some(value))
            .collect();

        Ok(matches)
    }

    async fn conditional_set(
        &self,
        path: &str,
        expected: &Value,
        value: Value,
    ) -> Result<bool, AppError> {
        self.ensure_online()?;
        validate_path(path)?;

        {
            let Some(mut current) = self.values.get_mut(path) else {
                return Ok(false);
            };
            if *current.value() != *expected {
                return Ok(false);
            }
            *current.value_mut() = value;
        }

        self.notify(path);
        Ok(true)
    }

    async fn subscribe(&self, path: &str) -> Result<Subscription, AppError> {
        self.ensure_online()?;
        validate_path(path)?;

        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        let (tx, events) = mpsc::unbounded_channel();
        self.watchers.insert(
            id,
            Watcher {
                path: path.to_string(),
                tx,
            },
        );

        Ok(Subscription { id, events })
    }

    async fn cancel(&self, id: SubscriptionId) -> Result<(), AppError> {
        self.watchers.remove(&id);
        Ok(())
    }
}
