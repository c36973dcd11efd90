//! Push-based metrics reporter for MarketFlow
//!
//! Periodically outputs pipeline counters and health as structured JSON to stdout.

use crate::application::monitoring::StatusMonitor;
use crate::application::monitoring::status_monitor::{CACHE_COMPONENT, STORE_COMPONENT};
use crate::domain::types::SystemStatus;
use crate::infrastructure::observability::metrics::Metrics;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Metrics snapshot for JSON output
#[derive(Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub pipeline: PipelineSnapshot,
    pub status: SystemStatus,
}

#[derive(Serialize)]
pub struct PipelineSnapshot {
    pub ticks_ingested: BTreeMap<String, u64>,
    pub ticks_dropped: BTreeMap<String, u64>,
    pub ticks_invalid: u64,
    pub ticks_late: u64,
    pub windows_emitted: u64,
    pub tier_write_failures: BTreeMap<String, u64>,
}

/// Outputs metrics as structured JSON logs on a configurable interval.
pub struct MetricsReporter {
    metrics: Metrics,
    status: Arc<StatusMonitor>,
    exchanges: Vec<String>,
    start_time: Instant,
    interval: Duration,
}

impl MetricsReporter {
    /// * `exchanges` - label values reported for per-exchange counters
    /// * `interval_seconds` - How often to output metrics (default: 60)
    pub fn new(
        metrics: Metrics,
        status: Arc<StatusMonitor>,
        exchanges: Vec<String>,
        interval_seconds: u64,
    ) -> Self {
        Self {
            metrics,
            status,
            exchanges,
            start_time: Instant::now(),
            interval: Duration::from_secs(interval_seconds.max(1)),
        }
    }

    /// Run until `shutdown` flips to true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "MetricsReporter: Starting push-based metrics (interval: {:?})",
            self.interval
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }

            let snapshot = self.collect_snapshot().await;
            match serde_json::to_string(&snapshot) {
                Ok(json) => {
                    // Use a special prefix so logs can be easily filtered
                    println!("METRICS_JSON:{}", json);
                    info!(
                        "Windows emitted: {} | Late: {} | Invalid: {} | Exchanges: {:?} | Uptime: {}s",
                        snapshot.pipeline.windows_emitted,
                        snapshot.pipeline.ticks_late,
                        snapshot.pipeline.ticks_invalid,
                        snapshot.status.exchange_connected,
                        snapshot.uptime_seconds
                    );
                }
                Err(e) => warn!("Failed to serialize metrics: {}", e),
            }
            debug!("Prometheus exposition:\n{}", self.metrics.render());
        }

        info!("MetricsReporter: stopped");
    }

    pub async fn collect_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            pipeline: PipelineSnapshot {
                ticks_ingested: by_label(&self.metrics.ticks_ingested_total, &self.exchanges),
                ticks_dropped: by_label(&self.metrics.ticks_dropped_total, &self.exchanges),
                ticks_invalid: self.metrics.ticks_invalid_total.get(),
                ticks_late: self.metrics.ticks_late_total.get(),
                windows_emitted: self.metrics.windows_emitted_total.get(),
                tier_write_failures: by_label(
                    &self.metrics.tier_write_failures_total,
                    &[CACHE_COMPONENT.to_string(), STORE_COMPONENT.to_string()],
                ),
            },
            status: self.status.snapshot().await,
        }
    }
}

fn by_label(counter: &prometheus::IntCounterVec, labels: &[String]) -> BTreeMap<String, u64> {
    labels
        .iter()
        .map(|label| (label.clone(), counter.with_label_values(&[label.as_str()]).get()))
        .collect()
}
