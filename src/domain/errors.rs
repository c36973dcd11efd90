use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors raised inside the ingestion → aggregation → storage pipeline
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("{component} unreachable: {reason}")]
    Connectivity { component: String, reason: String },

    #[error("late tick for {exchange}/{pair}: window ending {window_end} already closed")]
    LateTick {
        exchange: String,
        pair: String,
        window_end: DateTime<Utc>,
    },

    #[error("invalid tick from {exchange}: {reason}")]
    InvalidTick { exchange: String, reason: String },

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl PipelineError {
    pub fn connectivity(component: impl Into<String>, reason: impl ToString) -> Self {
        PipelineError::Connectivity {
            component: component.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_connectivity(&self) -> bool {
        matches!(self, PipelineError::Connectivity { .. })
    }
}

/// Errors returned to callers of the query interface
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("no aggregate found for {exchange}/{pair}")]
    NotFound { exchange: String, pair: String },

    #[error("invalid time range: from {from} is after to {to}")]
    InvalidRange {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },

    #[error(transparent)]
    Unavailable(#[from] PipelineError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_connectivity_formatting() {
        let err = PipelineError::connectivity("cache", "connection refused");
        assert!(err.is_connectivity());
        assert_eq!(err.to_string(), "cache unreachable: connection refused");
    }

    #[test]
    fn test_late_tick_formatting() {
        let err = PipelineError::LateTick {
            exchange: "exchange1".to_string(),
            pair: "BTCUSDT".to_string(),
            window_end: Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 0).unwrap(),
        };

        let msg = err.to_string();
        assert!(msg.contains("exchange1/BTCUSDT"));
        assert!(msg.contains("2024-01-01 00:01:00"));
        assert!(!err.is_connectivity());
    }

    #[test]
    fn test_query_error_wraps_pipeline_error() {
        let err: QueryError = PipelineError::connectivity("durable_store", "timed out").into();
        assert_eq!(err.to_string(), "durable_store unreachable: timed out");
    }
}
