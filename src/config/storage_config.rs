//! Cache tier, durable store and tier writer configuration.

use super::{Lookup, parse_positive, parse_var};
use crate::domain::errors::PipelineError;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct StorageEnvConfig {
    pub database_url: String,
    pub cache_retention: Duration,
    pub cache_max_entries: usize,
    pub tier_write_timeout: Duration,
    pub tier_max_retries: u32,
    pub tier_retry_backoff: Duration,
    pub store_backlog_capacity: usize,
}

impl Default for StorageEnvConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://data/marketflow.db".to_string(),
            cache_retention: Duration::from_secs(300),
            cache_max_entries: 10_000,
            tier_write_timeout: Duration::from_millis(2000),
            tier_max_retries: 3,
            tier_retry_backoff: Duration::from_millis(100),
            store_backlog_capacity: 10_000,
        }
    }
}

impl StorageEnvConfig {
    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, PipelineError> {
        let database_url = lookup("DATABASE_URL")
            .map(|v| v.trim().to_string())
            .unwrap_or_else(|| "sqlite://data/marketflow.db".to_string());
        if !database_url.starts_with("sqlite:") {
            return Err(PipelineError::Configuration(format!(
                "DATABASE_URL must be a sqlite url, got '{}'",
                database_url
            )));
        }

        Ok(Self {
            database_url,
            cache_retention: Duration::from_secs(parse_positive(
                lookup,
                "CACHE_RETENTION_SECS",
                300u64,
            )?),
            cache_max_entries: parse_positive(lookup, "CACHE_MAX_ENTRIES", 10_000usize)?,
            tier_write_timeout: Duration::from_millis(parse_positive(
                lookup,
                "TIER_WRITE_TIMEOUT_MS",
                2000u64,
            )?),
            tier_max_retries: parse_var(lookup, "TIER_MAX_RETRIES", 3u32)?,
            tier_retry_backoff: Duration::from_millis(parse_var(
                lookup,
                "TIER_RETRY_BACKOFF_MS",
                100u64,
            )?),
            store_backlog_capacity: parse_positive(lookup, "STORE_BACKLOG_CAPACITY", 10_000usize)?,
        })
    }
}
