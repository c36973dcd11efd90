//! Epoch-aligned window grid.
//!
//! Every key shares the same grid, so aggregates for different pairs and
//! exchanges cover identical intervals: `[k * D, (k + 1) * D)` in Unix ms.

use crate::domain::errors::PipelineError;
use chrono::{DateTime, Utc};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowGrid {
    length_ms: i64,
}

impl WindowGrid {
    pub fn new(length: Duration) -> Result<Self, PipelineError> {
        let length_ms = i64::try_from(length.as_millis()).map_err(|_| {
            PipelineError::Configuration(format!("window length {:?} is too large", length))
        })?;
        if length_ms <= 0 {
            return Err(PipelineError::Configuration(format!(
                "window length must be at least 1ms, got {:?}",
                length
            )));
        }
        Ok(Self { length_ms })
    }

    pub fn length_ms(&self) -> i64 {
        self.length_ms
    }

    pub fn length(&self) -> Duration {
        Duration::from_millis(self.length_ms as u64)
    }

    /// Start of the window containing `ts_ms`.
    pub fn window_start(&self, ts_ms: i64) -> i64 {
        ts_ms.div_euclid(self.length_ms) * self.length_ms
    }

    /// Exclusive end of the window containing `ts_ms`.
    pub fn window_end(&self, ts_ms: i64) -> i64 {
        self.window_start(ts_ms) + self.length_ms
    }

    /// First boundary strictly after `ts_ms`.
    pub fn next_boundary_after(&self, ts_ms: i64) -> i64 {
        self.window_end(ts_ms)
    }

    pub fn to_datetime(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_zero_length() {
        assert!(matches!(
            WindowGrid::new(Duration::ZERO),
            Err(PipelineError::Configuration(_))
        ));
        assert!(WindowGrid::new(Duration::from_micros(500)).is_err());
    }

    #[test]
    fn test_alignment_is_epoch_based() {
        let grid = WindowGrid::new(Duration::from_secs(60)).unwrap();

        // 2024-01-01T00:00:30Z
        let ts = 1_704_067_230_000;
        assert_eq!(grid.window_start(ts), 1_704_067_200_000);
        assert_eq!(grid.window_end(ts), 1_704_067_260_000);
    }

    #[test]
    fn test_boundary_belongs_to_next_window() {
        let grid = WindowGrid::new(Duration::from_secs(60)).unwrap();
        let boundary = 1_704_067_260_000;

        assert_eq!(grid.window_start(boundary), boundary);
        assert_eq!(grid.window_start(boundary - 1), boundary - 60_000);
        assert_eq!(grid.next_boundary_after(boundary), boundary + 60_000);
    }

    #[test]
    fn test_negative_timestamps_floor_correctly() {
        let grid = WindowGrid::new(Duration::from_secs(1)).unwrap();
        assert_eq!(grid.window_start(-1), -1000);
        assert_eq!(grid.window_end(-1), 0);
    }
}
