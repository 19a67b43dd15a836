use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub trip_requests_total: IntCounterVec,
    pub transition_conflicts_total: IntCounter,
    pub chat_messages_total: IntCounterVec,
    pub geocode_latency_seconds: HistogramVec,
    pub active_listeners: IntGauge,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let trip_requests_total = IntCounterVec::new(
            Opts::new("trip_requests_total", "Trip request lifecycle events by outcome"),
            &["outcome"],
        )
        .expect("valid trip_requests_total metric");

        let transition_conflicts_total = IntCounter::new(
            "transition_conflicts_total",
            "Accept/reject attempts refused because the request was no longer pending",
        )
        .expect("valid transition_conflicts_total metric");

        let chat_messages_total = IntCounterVec::new(
            Opts::new("chat_messages_total", "Chat send attempts by outcome"),
            &["outcome"],
        )
        .expect("valid chat_messages_total metric");

        let geocode_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "geocode_latency_seconds",
                "Latency of address geocoding calls in seconds",
            ),
            &["outcome"],
        )
        .expect("valid geocode_latency_seconds metric");

        let active_listeners = IntGauge::new(
            "active_listeners",
            "Standing message/location listeners not yet cancelled",
        )
        .expect("valid active_listeners metric");

        registry
            .register(Box::new(trip_requests_total.clone()))
            .expect("register trip_requests_total");
        registry
            .register(Box::new(transition_conflicts_total.clone()))
            .expect("register transition_conflicts_total");
        registry
            .register(Box::new(chat_messages_total.clone()))
            .expect("register chat_messages_total");
        registry
            .register(Box::new(geocode_latency_seconds.clone()))
            .expect("register geocode_latency_seconds");
        registry
            .register(Box::new(active_listeners.clone()))
            .expect("register active_listeners");

        Self {
            registry,
            trip_requests_total,
            transition_conflicts_total,
            chat_messages_total,
            geocode_latency_seconds,
            active_listeners,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}
