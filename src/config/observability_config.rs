//! Observability configuration parsing from environment variables.

use super::{Lookup, parse_positive, parse_var};
use crate::domain::errors::PipelineError;

/// Observability environment configuration
#[derive(Debug, Clone)]
pub struct ObservabilityEnvConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for ObservabilityEnvConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
        }
    }
}

impl ObservabilityEnvConfig {
    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, PipelineError> {
        Ok(Self {
            enabled: parse_var(lookup, "OBSERVABILITY_ENABLED", true)?,
            interval_secs: parse_positive(lookup, "OBSERVABILITY_INTERVAL", 60u64)?,
        })
    }
}
