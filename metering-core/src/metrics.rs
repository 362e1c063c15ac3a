//! Metrics collection for observability
//!
//! Prometheus metrics for monitoring the metering ledger.
//!
//! # Metrics
//!
//! - `metering_settlements_total` - Settlements that applied a charge
//! - `metering_settled_wei_total` - Total wei charged across all streams
//! - `metering_exhaustions_total` - Forced deactivations due to exhausted allowances
//! - `metering_transfer_failures_total` - Refused sink deliveries
//! - `metering_fallback_reroutes_total` - Charges rerouted in full to the treasury
//! - `metering_active_participants` - Currently active participants across streams

use prometheus::{IntCounter, IntGauge, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Settlements that applied a non-zero charge
    pub settlements_total: IntCounter,

    /// Total wei charged (saturated at u64 per increment)
    pub settled_wei_total: IntCounter,

    /// Forced deactivations due to exhausted allowances
    pub exhaustions_total: IntCounter,

    /// Refused sink deliveries
    pub transfer_failures_total: IntCounter,

    /// Charges rerouted in full to the treasury
    pub fallback_reroutes_total: IntCounter,

    /// Currently active participants across all streams
    pub active_participants: IntGauge,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let settlements_total = IntCounter::with_opts(Opts::new(
            "metering_settlements_total",
            "Settlements that applied a charge",
        ))?;
        registry.register(Box::new(settlements_total.clone()))?;

        let settled_wei_total = IntCounter::with_opts(Opts::new(
            "metering_settled_wei_total",
            "Total wei charged across all streams",
        ))?;
        registry.register(Box::new(settled_wei_total.clone()))?;

        let exhaustions_total = IntCounter::with_opts(Opts::new(
            "metering_exhaustions_total",
            "Forced deactivations due to exhausted allowances",
        ))?;
        registry.register(Box::new(exhaustions_total.clone()))?;

        let transfer_failures_total = IntCounter::with_opts(Opts::new(
            "metering_transfer_failures_total",
            "Refused sink deliveries",
        ))?;
        registry.register(Box::new(transfer_failures_total.clone()))?;

        let fallback_reroutes_total = IntCounter::with_opts(Opts::new(
            "metering_fallback_reroutes_total",
            "Charges rerouted in full to the treasury",
        ))?;
        registry.register(Box::new(fallback_reroutes_total.clone()))?;

        let active_participants = IntGauge::with_opts(Opts::new(
            "metering_active_participants",
            "Currently active participants across streams",
        ))?;
        registry.register(Box::new(active_participants.clone()))?;

        Ok(Self {
            settlements_total,
            settled_wei_total,
            exhaustions_total,
            transfer_failures_total,
            fallback_reroutes_total,
            active_participants,
            registry,
        })
    }

    /// Record a settled charge, saturating amounts beyond u64 range
    pub fn record_charge(&self, wei: u128) {
        self.settlements_total.inc();
        self.settled_wei_total.inc_by(u64::try_from(wei).unwrap_or(u64::MAX));
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("settlements_total", &self.settlements_total.get())
            .field("settled_wei_total", &self.settled_wei_total.get())
            .field("exhaustions_total", &self.exhaustions_total.get())
            .field("active_participants", &self.active_participants.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        let metrics = Metrics::new().unwrap();
        metrics.record_charge(50);
        metrics.record_charge(25);

        assert_eq!(metrics.settlements_total.get(), 2);
        assert_eq!(metrics.settled_wei_total.get(), 75);
        assert_eq!(metrics.registry.gather().len(), 6);
    }

    #[test]
    fn test_charge_saturates_beyond_u64() {
        let metrics = Metrics::new().unwrap();
        metrics.record_charge(u128::MAX);
        assert_eq!(metrics.settled_wei_total.get(), u64::MAX);
    }
}
