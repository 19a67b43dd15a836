use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::observability::metrics::Metrics;
use crate::store::{DataStore, Subscription, SubscriptionId};

pub struct Listener {
    id: SubscriptionId,
    store: Arc<dyn DataStore>,
    metrics: Metrics,
    task: JoinHandle<()>,
    stopped: bool,
}

impl Listener {
    pub(crate) fn spawn<T, F, Fut, U>(
        store: Arc<dyn DataStore>,
        metrics: Metrics,
        subscription: Subscription,
        fetch: F,
        on_update: U,
    ) -> Self
    where
        T: Send + 'static,
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, AppError>> + Send + 'static,
        U: Fn(T) + Send + 'static,
    {
        let Subscription { id, mut events } = subscription;

        let task = tokio::spawn(async move {
            loop {
                match fetch().await {
                    Ok(snapshot) => on_update(snapshot),
                    Err(err) => {
                        warn!(subscription_id = id.0, error = %err, "listener refresh failed")
                    }
                }

                if events.recv().await.is_none() {
                    break;
                }
                // coalesce whatever else arrived meanwhile into one refresh
                while events.try_recv().is_ok() {}
            }
            debug!(subscription_id = id.0, "listener stream closed");
        });

        metrics.active_listeners.inc();

        Self {
            id,
            store,
            metrics,
            task,
            stopped: false,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub async fn cancel(mut self) -> Result<(), AppError> {
        self.stop();
        self.store.cancel(self.id).await
    }

    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.task.abort();
        self.metrics.active_listeners.dec();
        self.stopped = true;
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    use super::Listener;
    use crate::observability::metrics::Metrics;
    use crate::store::memory::InMemoryStore;
    use crate::store::DataStore;

    const PATH: &str = "conductor_locations/c1";

    async fn spawn_listener(
        store: &Arc<InMemoryStore>,
        metrics: &Metrics,
    ) -> (Listener, mpsc::UnboundedReceiver<Option<Value>>) {
        let subscription = store.subscribe(PATH).await.unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let reader = store.clone();

        let listener = Listener::spawn(
            store.clone(),
            metrics.clone(),
            subscription,
            move || {
                let reader = reader.clone();
                async move { reader.get(PATH).await }
            },
            move |snapshot| {
                let _ = tx.send(snapshot);
            },
        );
        (listener, rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Option<Value>>) -> Option<Value> {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("listener update")
            .expect("listener alive")
    }

    #[tokio::test]
    async fn delivers_snapshot_then_changes() {
        let store = Arc::new(InMemoryStore::new());
        let metrics = Metrics::new();
        let (listener, mut rx) = spawn_listener(&store, &metrics).await;

        assert_eq!(next(&mut rx).await, None);
        store.set(PATH, json!({ "lat": 1.0 })).await.unwrap();
        assert_eq!(next(&mut rx).await, Some(json!({ "lat": 1.0 })));

        listener.cancel().await.unwrap();
    }

    #[tokio::test]
    async fn cancel_releases_registration_and_gauge_at_once() {
        let store = Arc::new(InMemoryStore::new());
        let metrics = Metrics::new();
        let (listener, mut rx) = spawn_listener(&store, &metrics).await;
        next(&mut rx).await;

        assert_eq!(store.subscription_count(), 1);
        assert_eq!(metrics.active_listeners.get(), 1);

        listener.cancel().await.unwrap();
        assert_eq!(store.subscription_count(), 0);
        assert_eq!(metrics.active_listeners.get(), 0);
    }

    #[tokio::test]
    async fn drop_stops_delivery_and_store_prunes_on_next_write() {
        let store = Arc::new(InMemoryStore::new());
        let metrics = Metrics::new();
        let (listener, mut rx) = spawn_listener(&store, &metrics).await;
        next(&mut rx).await;

        drop(listener);
        assert_eq!(metrics.active_listeners.get(), 0);

        // the aborted task releases its receiver once the runtime reaps it
        let mut pruned = false;
        for _ in 0..50 {
            store.set(PATH, json!({ "lat": 2.0 })).await.unwrap();
            if store.subscription_count() == 0 {
                pruned = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(pruned);

        // the callback's sender went down with the task
        let closed = tokio::time::timeout(Duration::from_secs(2), async {
            while rx.recv().await.is_some() {}
        })
        .await;
        assert!(closed.is_ok());
    }
}
