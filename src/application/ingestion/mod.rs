pub mod collector;

pub use collector::{CollectorConfig, CollectorHandle, CollectorStopped, FanInCollector};
