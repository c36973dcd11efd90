use crate::domain::errors::PipelineError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A single raw price observation from one exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketData {
    pub exchange: String,
    pub pair: String,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl MarketData {
    pub fn new(
        exchange: impl Into<String>,
        pair: impl Into<String>,
        price: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            pair: pair.into(),
            price,
            timestamp,
        }
    }

    pub fn key(&self) -> PairKey {
        PairKey::new(self.exchange.clone(), self.pair.clone())
    }

    /// Rejects ticks that must never reach the aggregation engine.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.exchange.trim().is_empty() {
            return Err(PipelineError::InvalidTick {
                exchange: self.exchange.clone(),
                reason: "empty exchange identifier".to_string(),
            });
        }
        if self.pair.trim().is_empty() {
            return Err(PipelineError::InvalidTick {
                exchange: self.exchange.clone(),
                reason: "empty trading pair".to_string(),
            });
        }
        if self.price <= Decimal::ZERO {
            return Err(PipelineError::InvalidTick {
                exchange: self.exchange.clone(),
                reason: format!("non-positive price {} for {}", self.price, self.pair),
            });
        }
        Ok(())
    }
}

/// Identifies one independent aggregation stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairKey {
    pub exchange: String,
    pub pair: String,
}

impl PairKey {
    pub fn new(exchange: impl Into<String>, pair: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            pair: pair.into(),
        }
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.exchange, self.pair)
    }
}

/// Statistics for one closed window of one key.
///
/// `timestamp` is the window close time (window start + window length).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedData {
    pub pair_name: String,
    pub exchange: String,
    pub timestamp: DateTime<Utc>,
    pub average_price: Decimal,
    pub max_price: Decimal,
    pub min_price: Decimal,
}

impl AggregatedData {
    pub fn key(&self) -> PairKey {
        PairKey::new(self.exchange.clone(), self.pair_name.clone())
    }
}

/// Source of ticks: real exchange feeds or the synthetic generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Live,
    Test,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Live => "live",
            Mode::Test => "test",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "live" => Ok(Mode::Live),
            "test" => Ok(Mode::Test),
            other => Err(PipelineError::Configuration(format!(
                "unknown mode '{}': must be 'live' or 'test'",
                other
            ))),
        }
    }
}

/// Point-in-time health snapshot. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStatus {
    #[serde(rename = "redis_connected")]
    pub cache_connected: bool,
    #[serde(rename = "postgres_connected")]
    pub store_connected: bool,
    pub exchange_connected: Vec<String>,
    pub mode: Mode,
}

/// Inclusive range of window close timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    pub fn is_valid(&self) -> bool {
        self.from <= self.to
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.from && ts <= self.to
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 1).unwrap()
    }

    #[test]
    fn test_validate_accepts_positive_price() {
        let tick = MarketData::new("exchange1", "BTCUSDT", dec!(68000.5), ts());
        assert!(tick.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_non_positive_price() {
        let zero = MarketData::new("exchange1", "BTCUSDT", Decimal::ZERO, ts());
        let negative = MarketData::new("exchange1", "BTCUSDT", dec!(-1), ts());

        assert!(matches!(
            zero.validate(),
            Err(PipelineError::InvalidTick { .. })
        ));
        assert!(matches!(
            negative.validate(),
            Err(PipelineError::InvalidTick { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_missing_identifiers() {
        let no_pair = MarketData::new("exchange1", " ", dec!(1), ts());
        let no_exchange = MarketData::new("", "BTCUSDT", dec!(1), ts());
        assert!(no_pair.validate().is_err());
        assert!(no_exchange.validate().is_err());
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("live".parse::<Mode>().unwrap(), Mode::Live);
        assert_eq!(" TEST ".parse::<Mode>().unwrap(), Mode::Test);
        assert!(matches!(
            "paper".parse::<Mode>(),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn test_system_status_wire_names() {
        let status = SystemStatus {
            cache_connected: true,
            store_connected: false,
            exchange_connected: vec!["exchange1".to_string()],
            mode: Mode::Test,
        };

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["redis_connected"], true);
        assert_eq!(json["postgres_connected"], false);
        assert_eq!(json["exchange_connected"][0], "exchange1");
        assert_eq!(json["mode"], "test");
    }

    #[test]
    fn test_time_range_is_inclusive() {
        let from = ts();
        let to = from + chrono::Duration::minutes(5);
        let range = TimeRange::new(from, to);

        assert!(range.is_valid());
        assert!(range.contains(from));
        assert!(range.contains(to));
        assert!(!range.contains(to + chrono::Duration::milliseconds(1)));
        assert!(!TimeRange::new(to, from).is_valid());
    }
}
