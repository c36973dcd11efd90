use crate::config::{ExchangeEndpoint, ExchangeEnvConfig};
use crate::domain::ports::{SourceFactory, TickSource};
use crate::domain::types::Mode;
use crate::infrastructure::sources::{LiveTickSource, SyntheticTickSource};
use std::sync::Arc;
use std::time::Duration;

/// Builds the source set for a mode from the exchange configuration.
///
/// Live mode connects to every configured endpoint; test mode runs one
/// synthetic generator per exchange name so aggregates keep the same keys.
pub struct ConfiguredSourceFactory {
    exchanges: Vec<ExchangeEndpoint>,
    pairs: Vec<String>,
    tick_interval: Duration,
}

impl ConfiguredSourceFactory {
    pub fn new(config: &ExchangeEnvConfig, tick_interval: Duration) -> Self {
        Self {
            exchanges: config.exchanges.clone(),
            pairs: config.pairs.clone(),
            tick_interval,
        }
    }
}

impl SourceFactory for ConfiguredSourceFactory {
    fn sources_for(&self, mode: Mode) -> Vec<Arc<dyn TickSource>> {
        self.exchanges
            .iter()
            .map(|endpoint| -> Arc<dyn TickSource> {
                match mode {
                    Mode::Live => Arc::new(LiveTickSource::new(
                        endpoint.name.clone(),
                        endpoint.url.clone(),
                        self.pairs.clone(),
                    )),
                    Mode::Test => Arc::new(SyntheticTickSource::new(
                        endpoint.name.clone(),
                        self.pairs.clone(),
                        self.tick_interval,
                    )),
                }
            })
            .collect()
    }
}
