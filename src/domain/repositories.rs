//! Storage tier abstractions.
//!
//! The pipeline writes every closed window to two tiers:
//! - `CacheTier`: latest aggregate per key, low-latency reads
//! - `DurableStore`: full history, idempotent on `(exchange, pair, timestamp)`
//!
//! Every failure surfaces as `PipelineError::Connectivity` so the tier writer
//! can flip the matching health flag.

use crate::domain::errors::PipelineError;
use crate::domain::types::{AggregatedData, PairKey, TimeRange};
use async_trait::async_trait;

#[async_trait]
pub trait CacheTier: Send + Sync {
    /// Overwrite the latest aggregate for `key`
    async fn put(&self, key: &PairKey, data: &AggregatedData) -> Result<(), PipelineError>;

    /// Latest aggregate for `key`, if still retained
    async fn get(&self, key: &PairKey) -> Result<Option<AggregatedData>, PipelineError>;

    /// Forget `key` so reads fall through to the durable store
    async fn remove(&self, key: &PairKey) -> Result<(), PipelineError>;

    async fn ping(&self) -> Result<(), PipelineError>;
}

#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Append one aggregate. Returns `false` if the row already existed.
    async fn append(&self, data: &AggregatedData) -> Result<bool, PipelineError>;

    /// Aggregates for `key` with `range.from <= timestamp <= range.to`, ascending
    async fn query(
        &self,
        key: &PairKey,
        range: TimeRange,
    ) -> Result<Vec<AggregatedData>, PipelineError>;

    async fn latest(&self, key: &PairKey) -> Result<Option<AggregatedData>, PipelineError>;

    /// Most recent aggregate of every known key
    async fn latest_per_key(&self) -> Result<Vec<AggregatedData>, PipelineError>;

    async fn ping(&self) -> Result<(), PipelineError>;

    async fn close(&self);
}
