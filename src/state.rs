use std::sync::Arc;

use crate::engine::chat::ChatChannel;
use crate::engine::lifecycle::RequestLifecycle;
use crate::engine::tracker::LocationTracker;
use crate::geocoding::Geocoder;
use crate::observability::metrics::Metrics;
use crate::store::DataStore;

pub struct AppState {
    pub lifecycle: Arc<RequestLifecycle>,
    pub chat: ChatChannel,
    pub tracker: LocationTracker,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(
        store: Arc<dyn DataStore>,
        geocoder: Arc<dyn Geocoder>,
        metrics: Metrics,
        max_message_len: usize,
    ) -> Self {
        let lifecycle = Arc::new(RequestLifecycle::new(store.clone(), metrics.clone()));

        Self {
            chat: ChatChannel::new(
                store.clone(),
                lifecycle.clone(),
                metrics.clone(),
                max_message_len,
            ),
            tracker: LocationTracker::new(store, lifecycle.clone(), geocoder, metrics.clone()),
            lifecycle,
            metrics,
        }
    }
}
