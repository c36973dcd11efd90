//! Configuration module for MarketFlow.
//!
//! This module provides structured configuration loading from environment variables,
//! organized by concern: Pipeline, Storage, Exchanges, and Observability.

mod exchange_config;
mod observability_config;
mod pipeline_config;
mod storage_config;

pub use exchange_config::{DEFAULT_EXCHANGES, DEFAULT_PAIRS, ExchangeEndpoint, ExchangeEnvConfig};
pub use observability_config::ObservabilityEnvConfig;
pub use pipeline_config::PipelineEnvConfig;
pub use storage_config::StorageEnvConfig;

use crate::domain::errors::PipelineError;
use crate::domain::types::Mode;
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

/// Reads one configuration variable; `None` means unset.
pub type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

pub(crate) fn parse_var<T>(lookup: Lookup<'_>, key: &str, default: T) -> Result<T, PipelineError>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|e| {
            PipelineError::Configuration(format!("Failed to parse {}='{}': {}", key, raw, e))
        }),
    }
}

pub(crate) fn parse_positive<T>(
    lookup: Lookup<'_>,
    key: &str,
    default: T,
) -> Result<T, PipelineError>
where
    T: FromStr + PartialOrd + Default + Display,
    T::Err: Display,
{
    let value = parse_var(lookup, key, default)?;
    if value <= T::default() {
        return Err(PipelineError::Configuration(format!(
            "{} must be greater than zero, got {}",
            key, value
        )));
    }
    Ok(value)
}

/// Main application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    // Core
    pub mode: Mode,
    pub port: u16,
    pub shutdown_grace: Duration,

    pub pipeline: PipelineEnvConfig,
    pub storage: StorageEnvConfig,
    pub exchanges: ExchangeEnvConfig,
    pub observability: ObservabilityEnvConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, PipelineError> {
        Self::from_lookup(&|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable source.
    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, PipelineError> {
        let mode = match lookup("MODE") {
            Some(raw) => Mode::from_str(&raw)?,
            None => Mode::Live,
        };

        Ok(Self {
            mode,
            port: parse_positive(lookup, "PORT", 8080u16)?,
            shutdown_grace: Duration::from_secs(parse_positive(
                lookup,
                "SHUTDOWN_GRACE_SECS",
                5u64,
            )?),
            pipeline: PipelineEnvConfig::from_lookup(lookup)?,
            storage: StorageEnvConfig::from_lookup(lookup)?,
            exchanges: ExchangeEnvConfig::from_lookup(lookup)?,
            observability: ObservabilityEnvConfig::from_lookup(lookup)?,
        })
    }

    /// Apply a `--port` flag on top of the environment value.
    pub fn with_port_override(mut self, port: Option<u16>) -> Self {
        if let Some(port) = port {
            self.port = port;
        }
        self
    }
}
