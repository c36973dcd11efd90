//! Push-based observability for MarketFlow
//!
//! Metrics live in a per-instance Prometheus registry and are pushed out as
//! periodic structured JSON logs. Nothing here accepts requests.

pub mod metrics;
pub mod reporter;

pub use metrics::Metrics;
pub use reporter::MetricsReporter;
