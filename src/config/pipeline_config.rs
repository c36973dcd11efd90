//! Ingestion and aggregation configuration.

use super::{Lookup, parse_positive};
use crate::domain::errors::PipelineError;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PipelineEnvConfig {
    pub window: Duration,
    pub liveness_timeout: Duration,
    /// Ring slots per source. The ring rounds this up to a power of two,
    /// so 1000 holds 1024 ticks before the oldest is overwritten.
    pub source_buffer_capacity: usize,
    pub aggregation_shards: usize,
    pub test_tick_interval: Duration,
}

impl Default for PipelineEnvConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            liveness_timeout: Duration::from_secs(10),
            source_buffer_capacity: 1024,
            aggregation_shards: 4,
            test_tick_interval: Duration::from_millis(500),
        }
    }
}

impl PipelineEnvConfig {
    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, PipelineError> {
        Ok(Self {
            window: Duration::from_secs(parse_positive(lookup, "WINDOW_SECS", 60u64)?),
            liveness_timeout: Duration::from_secs(parse_positive(
                lookup,
                "LIVENESS_TIMEOUT_SECS",
                10u64,
            )?),
            source_buffer_capacity: parse_positive(lookup, "SOURCE_BUFFER_CAPACITY", 1024usize)?,
            aggregation_shards: parse_positive(lookup, "AGGREGATION_SHARDS", 4usize)?,
            test_tick_interval: Duration::from_millis(parse_positive(
                lookup,
                "TEST_TICK_INTERVAL_MS",
                500u64,
            )?),
        })
    }
}
