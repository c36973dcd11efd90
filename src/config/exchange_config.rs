//! Exchange endpoints and traded pairs.
//!
//! `EXCHANGES` is a comma-separated list of `name=ws-url` entries,
//! `PAIRS` a comma-separated list of symbols tracked on every exchange.

use super::Lookup;
use crate::domain::errors::PipelineError;
use url::Url;

pub const DEFAULT_EXCHANGES: &str =
    "exchange1=ws://127.0.0.1:40101,exchange2=ws://127.0.0.1:40102,exchange3=ws://127.0.0.1:40103";
pub const DEFAULT_PAIRS: &str = "BTCUSDT,DOGEUSDT,TONUSDT,SOLUSDT,ETHUSDT";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeEndpoint {
    pub name: String,
    pub url: Url,
}

#[derive(Debug, Clone)]
pub struct ExchangeEnvConfig {
    pub exchanges: Vec<ExchangeEndpoint>,
    pub pairs: Vec<String>,
}

impl ExchangeEnvConfig {
    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, PipelineError> {
        let exchanges_raw = lookup("EXCHANGES").unwrap_or_else(|| DEFAULT_EXCHANGES.to_string());
        let pairs_raw = lookup("PAIRS").unwrap_or_else(|| DEFAULT_PAIRS.to_string());

        Ok(Self {
            exchanges: Self::parse_exchanges(&exchanges_raw)?,
            pairs: Self::parse_pairs(&pairs_raw)?,
        })
    }

    pub fn parse_exchanges(raw: &str) -> Result<Vec<ExchangeEndpoint>, PipelineError> {
        let mut endpoints: Vec<ExchangeEndpoint> = Vec::new();

        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (name, url) = entry.split_once('=').ok_or_else(|| {
                PipelineError::Configuration(format!(
                    "EXCHANGES entry '{}' must look like name=ws://host:port",
                    entry
                ))
            })?;
            let name = name.trim();
            if name.is_empty() {
                return Err(PipelineError::Configuration(format!(
                    "EXCHANGES entry '{}' has an empty name",
                    entry
                )));
            }
            if endpoints.iter().any(|e| e.name == name) {
                return Err(PipelineError::Configuration(format!(
                    "exchange '{}' is listed twice",
                    name
                )));
            }

            let url = Url::parse(url.trim()).map_err(|e| {
                PipelineError::Configuration(format!("invalid url for {}: {}", name, e))
            })?;
            if !matches!(url.scheme(), "ws" | "wss") {
                return Err(PipelineError::Configuration(format!(
                    "url for {} must use ws:// or wss://, got {}",
                    name,
                    url.scheme()
                )));
            }

            endpoints.push(ExchangeEndpoint {
                name: name.to_string(),
                url,
            });
        }

        if endpoints.is_empty() {
            return Err(PipelineError::Configuration(
                "EXCHANGES must name at least one exchange".to_string(),
            ));
        }
        Ok(endpoints)
    }

    pub fn parse_pairs(raw: &str) -> Result<Vec<String>, PipelineError> {
        let mut pairs: Vec<String> = Vec::new();
        for pair in raw
            .split(',')
            .map(|p| p.trim().to_uppercase())
            .filter(|p| !p.is_empty())
        {
            if !pairs.contains(&pair) {
                pairs.push(pair);
            }
        }

        if pairs.is_empty() {
            return Err(PipelineError::Configuration(
                "PAIRS must name at least one trading pair".to_string(),
            ));
        }
        Ok(pairs)
    }

    pub fn exchange_names(&self) -> Vec<String> {
        self.exchanges.iter().map(|e| e.name.clone()).collect()
    }
}
