use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub transitions_total: IntCounterVec,
    pub positions_total: IntCounterVec,
    pub route_provider_calls_total: IntCounterVec,
    pub route_throttled_total: IntCounter,
    pub active_subscriptions: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let transitions_total = IntCounterVec::new(
            Opts::new(
                "transitions_total",
                "Lifecycle transition attempts by event and outcome",
            ),
            &["event", "outcome"],
        )
        .expect("valid transitions_total metric");

        let positions_total = IntCounterVec::new(
            Opts::new(
                "positions_total",
                "Position samples ingested by outcome",
            ),
            &["outcome"],
        )
        .expect("valid positions_total metric");

        let route_provider_calls_total = IntCounterVec::new(
            Opts::new(
                "route_provider_calls_total",
                "Routing provider invocations by outcome",
            ),
            &["outcome"],
        )
        .expect("valid route_provider_calls_total metric");

        let route_throttled_total = IntCounter::new(
            "route_throttled_total",
            "Route estimate requests answered from the throttled cache",
        )
        .expect("valid route_throttled_total metric");

        let active_subscriptions = IntGauge::new(
            "active_subscriptions",
            "Currently connected realtime subscribers",
        )
        .expect("valid active_subscriptions metric");

        registry
            .register(Box::new(transitions_total.clone()))
            .expect("register transitions_total");
        registry
            .register(Box::new(positions_total.clone()))
            .expect("register positions_total");
        registry
            .register(Box::new(route_provider_calls_total.clone()))
            .expect("register route_provider_calls_total");
        registry
            .register(Box::new(route_throttled_total.clone()))
            .expect("register route_throttled_total");
        registry
            .register(Box::new(active_subscriptions.clone()))
            .expect("register active_subscriptions");

        Self {
            registry,
            transitions_total,
            positions_total,
            route_provider_calls_total,
            route_throttled_total,
            active_subscriptions,
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
