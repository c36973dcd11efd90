//! Per-key window state.
//!
//! A key moves `NoWindow -> Accumulating -> (closing) -> NoWindow`. Closing is
//! the instant a window is turned into an `AggregatedData`; it never spans
//! an await point, so it is not stored as a variant.

use crate::domain::errors::PipelineError;
use crate::domain::types::{AggregatedData, MarketData, PairKey};
use crate::domain::window::WindowGrid;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Running statistics of one open window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowAccumulator {
    start_ms: i64,
    end_ms: i64,
    sum: Decimal,
    count: u64,
    min: Decimal,
    max: Decimal,
}

impl WindowAccumulator {
    fn open(grid: &WindowGrid, ts_ms: i64, price: Decimal) -> Self {
        Self {
            start_ms: grid.window_start(ts_ms),
            end_ms: grid.window_end(ts_ms),
            sum: price,
            count: 1,
            min: price,
            max: price,
        }
    }

    fn add(&mut self, price: Decimal) {
        self.sum += price;
        self.count += 1;
        self.min = self.min.min(price);
        self.max = self.max.max(price);
    }

    fn finish(&self, key: &PairKey) -> AggregatedData {
        // Division rounds at 28 digits; keep the average inside [min, max]
        let average = (self.sum / Decimal::from(self.count))
            .normalize()
            .clamp(self.min, self.max);

        AggregatedData {
            pair_name: key.pair.clone(),
            exchange: key.exchange.clone(),
            timestamp: WindowGrid::to_datetime(self.end_ms),
            average_price: average,
            max_price: self.max,
            min_price: self.min,
        }
    }

    pub fn start_ms(&self) -> i64 {
        self.start_ms
    }

    pub fn end_ms(&self) -> i64 {
        self.end_ms
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn min(&self) -> Decimal {
        self.min
    }

    pub fn max(&self) -> Decimal {
        self.max
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyState {
    NoWindow,
    Accumulating(WindowAccumulator),
}

/// All key states owned by one shard, plus the shard's closed watermark.
pub struct WindowBook {
    grid: WindowGrid,
    keys: HashMap<PairKey, KeyState>,
    closed_through_ms: i64,
}

impl WindowBook {
    pub fn new(grid: WindowGrid) -> Self {
        Self {
            grid,
            keys: HashMap::new(),
            closed_through_ms: i64::MIN,
        }
    }

    /// Apply one tick.
    ///
    /// Returns the aggregate of the previous window when the tick belongs to
    /// a later window than the one open for its key.
    pub fn on_tick(&mut self, tick: &MarketData) -> Result<Option<AggregatedData>, PipelineError> {
        let ts_ms = tick.timestamp.timestamp_millis();
        let start_ms = self.grid.window_start(ts_ms);
        let end_ms = self.grid.window_end(ts_ms);
        let key = tick.key();

        if end_ms <= self.closed_through_ms {
            return Err(Self::late(&key, end_ms));
        }

        let state = self.keys.entry(key.clone()).or_insert(KeyState::NoWindow);
        match state {
            KeyState::NoWindow => {
                *state = KeyState::Accumulating(WindowAccumulator::open(&self.grid, ts_ms, tick.price));
                Ok(None)
            }
            KeyState::Accumulating(acc) if acc.start_ms == start_ms => {
                acc.add(tick.price);
                Ok(None)
            }
            KeyState::Accumulating(acc) if start_ms < acc.start_ms => Err(Self::late(&key, end_ms)),
            KeyState::Accumulating(acc) => {
                let closed = acc.finish(&key);
                *acc = WindowAccumulator::open(&self.grid, ts_ms, tick.price);
                Ok(Some(closed))
            }
        }
    }

    /// Close every window ending at or before `boundary_ms`.
    pub fn close_due(&mut self, boundary_ms: i64) -> Vec<AggregatedData> {
        let mut closed = Vec::new();
        for (key, state) in self.keys.iter_mut() {
            if let KeyState::Accumulating(acc) = state
                && acc.end_ms <= boundary_ms
            {
                closed.push(acc.finish(key));
                *state = KeyState::NoWindow;
            }
        }
        self.closed_through_ms = self.closed_through_ms.max(boundary_ms);
        Self::sorted(closed)
    }

    /// Close every open window early.
    pub fn flush(&mut self) -> Vec<AggregatedData> {
        let mut closed = Vec::new();
        let mut watermark = self.closed_through_ms;
        for (key, state) in self.keys.iter_mut() {
            if let KeyState::Accumulating(acc) = state {
                watermark = watermark.max(acc.end_ms);
                closed.push(acc.finish(key));
                *state = KeyState::NoWindow;
            }
        }
        // A flushed window is final; later ticks for it are late
        self.closed_through_ms = watermark;
        Self::sorted(closed)
    }

    pub fn state(&self, key: &PairKey) -> KeyState {
        self.keys.get(key).cloned().unwrap_or(KeyState::NoWindow)
    }

    pub fn open_window(&self, key: &PairKey) -> Option<WindowAccumulator> {
        match self.keys.get(key) {
            Some(KeyState::Accumulating(acc)) => Some(acc.clone()),
            _ => None,
        }
    }

    pub fn watermark_ms(&self) -> i64 {
        self.closed_through_ms
    }

    fn late(key: &PairKey, end_ms: i64) -> PipelineError {
        PipelineError::LateTick {
            exchange: key.exchange.clone(),
            pair: key.pair.clone(),
            window_end: WindowGrid::to_datetime(end_ms),
        }
    }

    fn sorted(mut closed: Vec<AggregatedData>) -> Vec<AggregatedData> {
        closed.sort_by(|a, b| {
            (&a.exchange, &a.pair_name, a.timestamp).cmp(&(&b.exchange, &b.pair_name, b.timestamp))
        });
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn at(min: u32, sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, min, sec).unwrap()
    }

    fn book() -> WindowBook {
        WindowBook::new(WindowGrid::new(Duration::from_secs(60)).unwrap())
    }

    fn tick(pair: &str, price: Decimal, ts: DateTime<Utc>) -> MarketData {
        MarketData::new("exchange1", pair, price, ts)
    }

    #[test]
    fn test_window_statistics() {
        let mut book = book();
        for price in [dec!(100), dec!(110), dec!(90)] {
            assert_eq!(book.on_tick(&tick("BTCUSDT", price, at(0, 10))).unwrap(), None);
        }

        let closed = book.close_due(at(1, 0).timestamp_millis());
        assert_eq!(closed.len(), 1);
        let agg = &closed[0];
        assert_eq!(agg.average_price, dec!(100));
        assert_eq!(agg.max_price, dec!(110));
        assert_eq!(agg.min_price, dec!(90));
        assert_eq!(agg.timestamp, at(1, 0));
        assert_eq!(book.state(&agg.key()), KeyState::NoWindow);
    }

    #[test]
    fn test_average_stays_between_min_and_max() {
        let mut book = book();
        for price in [dec!(0.1), dec!(0.1), dec!(0.2)] {
            book.on_tick(&tick("DOGEUSDT", price, at(0, 1))).unwrap();
        }
        let agg = book.close_due(at(1, 0).timestamp_millis()).remove(0);
        assert!(agg.min_price <= agg.average_price && agg.average_price <= agg.max_price);
    }

    #[test]
    fn test_tick_on_boundary_belongs_to_next_window() {
        let mut book = book();
        book.on_tick(&tick("BTCUSDT", dec!(1), at(0, 59))).unwrap();
        let rolled = book.on_tick(&tick("BTCUSDT", dec!(2), at(1, 0))).unwrap();

        let rolled = rolled.expect("previous window should close on roll");
        assert_eq!(rolled.timestamp, at(1, 0));
        assert_eq!(rolled.average_price, dec!(1));

        let open = book.open_window(&PairKey::new("exchange1", "BTCUSDT")).unwrap();
        assert_eq!(open.start_ms(), at(1, 0).timestamp_millis());
        assert_eq!(open.count(), 1);
    }

    #[test]
    fn test_late_tick_after_close_is_rejected() {
        let mut book = book();
        book.on_tick(&tick("BTCUSDT", dec!(100), at(0, 30))).unwrap();
        let emitted = book.close_due(at(1, 0).timestamp_millis());

        let result = book.on_tick(&tick("BTCUSDT", dec!(500), at(0, 45)));
        assert!(matches!(result, Err(PipelineError::LateTick { .. })));
        assert_eq!(emitted[0].max_price, dec!(100));
        assert_eq!(book.state(&PairKey::new("exchange1", "BTCUSDT")), KeyState::NoWindow);
    }

    #[test]
    fn test_tick_before_open_window_is_late() {
        let mut book = book();
        book.on_tick(&tick("BTCUSDT", dec!(100), at(2, 0))).unwrap();
        let result = book.on_tick(&tick("BTCUSDT", dec!(100), at(1, 59)));
        assert!(matches!(result, Err(PipelineError::LateTick { .. })));
    }

    #[test]
    fn test_keys_are_independent() {
        let mut book = book();
        book.on_tick(&tick("BTCUSDT", dec!(100), at(0, 1))).unwrap();
        book.on_tick(&tick("ETHUSDT", dec!(3000), at(0, 2))).unwrap();
        book.on_tick(&MarketData::new("exchange2", "BTCUSDT", dec!(101), at(0, 3)))
            .unwrap();

        let closed = book.close_due(at(1, 0).timestamp_millis());
        assert_eq!(closed.len(), 3);
        assert_eq!(closed[0].pair_name, "BTCUSDT");
        assert_eq!(closed[0].exchange, "exchange1");
        assert_eq!(closed[2].exchange, "exchange2");
    }

    #[test]
    fn test_zero_tick_window_emits_nothing() {
        let mut book = book();
        book.on_tick(&tick("BTCUSDT", dec!(100), at(0, 1))).unwrap();
        assert_eq!(book.close_due(at(1, 0).timestamp_millis()).len(), 1);
        assert!(book.close_due(at(2, 0).timestamp_millis()).is_empty());
        assert_eq!(book.watermark_ms(), at(2, 0).timestamp_millis());
    }

    #[test]
    fn test_close_due_keeps_future_windows_open() {
        let mut book = book();
        book.on_tick(&tick("BTCUSDT", dec!(100), at(5, 0))).unwrap();
        assert!(book.close_due(at(1, 0).timestamp_millis()).is_empty());
        assert!(book.open_window(&PairKey::new("exchange1", "BTCUSDT")).is_some());
    }

    #[test]
    fn test_flush_closes_early_and_blocks_reopen() {
        let mut book = book();
        book.on_tick(&tick("BTCUSDT", dec!(100), at(0, 10))).unwrap();
        let flushed = book.flush();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].timestamp, at(1, 0));

        assert!(book.on_tick(&tick("BTCUSDT", dec!(100), at(0, 20))).is_err());
        assert!(book.flush().is_empty());
    }
}
