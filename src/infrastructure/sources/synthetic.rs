use crate::domain::errors::PipelineError;
use crate::domain::ports::{SourceId, TickSource};
use crate::domain::types::{MarketData, Mode};
use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc::{self, Receiver};
use tokio::time;
use tracing::{debug, info};

/// Random-walk tick generator used in `test` mode.
///
/// Each interval emits one tick per pair, moving the price by at most ±0.5%.
pub struct SyntheticTickSource {
    exchange: String,
    pairs: Vec<String>,
    interval: Duration,
    seed: Option<u64>,
}

impl SyntheticTickSource {
    pub fn new(exchange: impl Into<String>, pairs: Vec<String>, interval: Duration) -> Self {
        Self {
            exchange: exchange.into(),
            pairs,
            interval,
            seed: None,
        }
    }

    /// Fixed seed for reproducible price paths
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn base_price(pair: &str) -> f64 {
        if pair.starts_with("BTC") {
            96000.0
        } else if pair.starts_with("ETH") {
            3400.0
        } else if pair.starts_with("SOL") {
            150.0
        } else if pair.starts_with("TON") {
            5.0
        } else if pair.starts_with("DOGE") {
            0.3
        } else {
            100.0
        }
    }
}

#[async_trait]
impl TickSource for SyntheticTickSource {
    fn id(&self) -> SourceId {
        SourceId::new(self.exchange.clone(), Mode::Test)
    }

    async fn subscribe(&self) -> Result<Receiver<MarketData>, PipelineError> {
        if self.pairs.is_empty() {
            return Err(PipelineError::Configuration(format!(
                "synthetic source {} has no pairs",
                self.exchange
            )));
        }

        let (tx, rx) = mpsc::channel(self.pairs.len().max(64));
        let exchange = self.exchange.clone();
        let pairs = self.pairs.clone();
        let period = self.interval.max(Duration::from_millis(1));
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::seed_from_u64(rand::random()),
        };

        tokio::spawn(async move {
            let mut prices: HashMap<String, f64> = pairs
                .iter()
                .map(|p| (p.clone(), Self::base_price(p)))
                .collect();

            info!(
                "SyntheticTickSource [{}]: starting random walk for {:?}",
                exchange, pairs
            );

            let mut interval = time::interval(period);
            'outer: loop {
                interval.tick().await;

                for pair in &pairs {
                    let current = prices.get(pair).copied().unwrap_or(100.0);
                    let change_pct: f64 = rng.random_range(-0.005..=0.005);
                    let next = current * (1.0 + change_pct);
                    prices.insert(pair.clone(), next);

                    let price = Decimal::from_f64(next)
                        .map(|d| d.round_dp(8))
                        .filter(|d| *d > Decimal::ZERO)
                        .unwrap_or(Decimal::ONE);

                    let tick = MarketData::new(exchange.clone(), pair.clone(), price, Utc::now());
                    if tx.send(tick).await.is_err() {
                        break 'outer;
                    }
                }
            }

            debug!("SyntheticTickSource [{}]: subscriber gone, stopping", exchange);
        });

        Ok(rx)
    }
}
