//! Read side of the pipeline: latest price, history, health and mode.

use crate::application::mode_controller::ModeHandle;
use crate::application::monitoring::{STORE_COMPONENT, StatusMonitor};
use crate::domain::errors::{PipelineError, QueryError};
use crate::domain::repositories::{CacheTier, DurableStore};
use crate::domain::types::{AggregatedData, Mode, PairKey, SystemStatus, TimeRange};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct QueryService {
    cache: Arc<dyn CacheTier>,
    store: Arc<dyn DurableStore>,
    status: Arc<StatusMonitor>,
    modes: ModeHandle,
    tier_timeout: Duration,
}

impl QueryService {
    pub fn new(
        cache: Arc<dyn CacheTier>,
        store: Arc<dyn DurableStore>,
        status: Arc<StatusMonitor>,
        modes: ModeHandle,
        tier_timeout: Duration,
    ) -> Self {
        Self {
            cache,
            store,
            status,
            modes,
            tier_timeout,
        }
    }

    /// Most recent aggregate for the key.
    ///
    /// Served from the cache when it has the key, otherwise from the durable
    /// store. A failing cache is not an error as long as the store answers.
    pub async fn get_latest(&self, exchange: &str, pair: &str) -> Result<AggregatedData, QueryError> {
        let key = PairKey::new(exchange, pair);

        match tokio::time::timeout(self.tier_timeout, self.cache.get(&key)).await {
            Ok(Ok(Some(hit))) => return Ok(hit),
            Ok(Ok(None)) => debug!("QueryService: cache miss for {}", key),
            Ok(Err(e)) => warn!("QueryService: cache read for {} failed: {}", key, e),
            Err(_) => warn!(
                "QueryService: cache read for {} timed out after {:?}",
                key, self.tier_timeout
            ),
        }

        let latest = tokio::time::timeout(self.tier_timeout, self.store.latest(&key))
            .await
            .map_err(|_| self.store_timeout())??;

        latest.ok_or_else(|| QueryError::NotFound {
            exchange: exchange.to_string(),
            pair: pair.to_string(),
        })
    }

    /// Aggregates whose window close falls within `range`, oldest first.
    pub async fn get_history(
        &self,
        exchange: &str,
        pair: &str,
        range: TimeRange,
    ) -> Result<Vec<AggregatedData>, QueryError> {
        if !range.is_valid() {
            return Err(QueryError::InvalidRange {
                from: range.from,
                to: range.to,
            });
        }

        let key = PairKey::new(exchange, pair);
        let rows = tokio::time::timeout(self.tier_timeout, self.store.query(&key, range))
            .await
            .map_err(|_| self.store_timeout())??;
        Ok(rows)
    }

    pub async fn get_status(&self) -> SystemStatus {
        self.status.snapshot().await
    }

    pub async fn set_mode(&self, mode: Mode) -> Result<Mode, QueryError> {
        Ok(self.modes.set_mode(mode).await?)
    }

    fn store_timeout(&self) -> QueryError {
        QueryError::Unavailable(PipelineError::connectivity(
            STORE_COMPONENT,
            format!("read timed out after {:?}", self.tier_timeout),
        ))
    }
}
