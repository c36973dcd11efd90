//! Prometheus metrics definitions for MarketFlow
//!
//! All metrics use the `marketflow_` prefix.

use prometheus::{IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Prometheus metrics for the ingestion pipeline
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Ticks read from a source, by exchange
    pub ticks_ingested_total: IntCounterVec,
    /// Ticks overwritten in a full source buffer, by exchange
    pub ticks_dropped_total: IntCounterVec,
    /// Ticks rejected by validation
    pub ticks_invalid_total: IntCounter,
    /// Ticks that arrived after their window closed
    pub ticks_late_total: IntCounter,
    /// Aggregates emitted by the engine
    pub windows_emitted_total: IntCounter,
    /// Failed tier writes after retries, by tier
    pub tier_write_failures_total: IntCounterVec,
    /// Component health (1=up, 0=down)
    pub component_up: IntGaugeVec,
}

impl Metrics {
    /// Create a new Metrics instance with all gauges and counters registered
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let ticks_ingested_total = IntCounterVec::new(
            Opts::new(
                "marketflow_ticks_ingested_total",
                "Ticks read from sources",
            ),
            &["exchange"],
        )?;
        registry.register(Box::new(ticks_ingested_total.clone()))?;

        let ticks_dropped_total = IntCounterVec::new(
            Opts::new(
                "marketflow_ticks_dropped_total",
                "Ticks dropped by a full source buffer",
            ),
            &["exchange"],
        )?;
        registry.register(Box::new(ticks_dropped_total.clone()))?;

        let ticks_invalid_total = IntCounter::with_opts(Opts::new(
            "marketflow_ticks_invalid_total",
            "Ticks rejected at ingestion",
        ))?;
        registry.register(Box::new(ticks_invalid_total.clone()))?;

        let ticks_late_total = IntCounter::with_opts(Opts::new(
            "marketflow_ticks_late_total",
            "Ticks discarded because their window was already closed",
        ))?;
        registry.register(Box::new(ticks_late_total.clone()))?;

        let windows_emitted_total = IntCounter::with_opts(Opts::new(
            "marketflow_windows_emitted_total",
            "Closed windows emitted as aggregates",
        ))?;
        registry.register(Box::new(windows_emitted_total.clone()))?;

        let tier_write_failures_total = IntCounterVec::new(
            Opts::new(
                "marketflow_tier_write_failures_total",
                "Tier writes that failed after all retries",
            ),
            &["tier"],
        )?;
        registry.register(Box::new(tier_write_failures_total.clone()))?;

        let component_up = IntGaugeVec::new(
            Opts::new("marketflow_component_up", "Component health (1=up, 0=down)"),
            &["component"],
        )?;
        registry.register(Box::new(component_up.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            ticks_ingested_total,
            ticks_dropped_total,
            ticks_invalid_total,
            ticks_late_total,
            windows_emitted_total,
            tier_write_failures_total,
            component_up,
        })
    }

    /// Render all metrics in Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }

    pub fn inc_ingested(&self, exchange: &str) {
        self.ticks_ingested_total
            .with_label_values(&[exchange])
            .inc();
    }

    pub fn inc_dropped(&self, exchange: &str, count: u64) {
        self.ticks_dropped_total
            .with_label_values(&[exchange])
            .inc_by(count);
    }

    pub fn inc_tier_failure(&self, tier: &str) {
        self.tier_write_failures_total
            .with_label_values(&[tier])
            .inc();
    }

    pub fn set_component_up(&self, component: &str, up: bool) {
        self.component_up
            .with_label_values(&[component])
            .set(i64::from(up));
    }

    pub fn dropped(&self, exchange: &str) -> u64 {
        self.ticks_dropped_total
            .with_label_values(&[exchange])
            .get()
    }

    pub fn ingested(&self, exchange: &str) -> u64 {
        self.ticks_ingested_total
            .with_label_values(&[exchange])
            .get()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create default Metrics")
    }
}
