use prometheus_client::{
    metrics::{counter::Counter, gauge::Gauge},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct AggregatorMetrics {
    pub(crate) saves: Counter,
    pub(crate) save_errors: Counter,
    pub(crate) policies: Gauge,
}

#[derive(Clone, Debug, Default)]
pub struct RolloutMetrics {
    pub(crate) updates: Counter,
    pub(crate) errors: Counter,
}

// === impl AggregatorMetrics ===

impl AggregatorMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let saves = Counter::default();
        prom.register(
            "saves",
            "Count of configuration writes to the proxy's Secret",
            saves.clone(),
        );

        let save_errors = Counter::default();
        prom.register(
            "save_errors",
            "Count of failed configuration writes",
            save_errors.clone(),
        );

        let policies = Gauge::default();
        prom.register(
            "policies",
            "Number of policies in the most recently written configuration",
            policies.clone(),
        );

        Self {
            saves,
            save_errors,
            policies,
        }
    }
}

// === impl RolloutMetrics ===

impl RolloutMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let updates = Counter::default();
        prom.register(
            "rollouts",
            "Count of deployments stamped with a configuration checksum",
            updates.clone(),
        );

        let errors = Counter::default();
        prom.register(
            "rollout_errors",
            "Count of deployments that could not be read or updated",
            errors.clone(),
        );

        Self { updates, errors }
    }
}
