pub mod accumulator;
pub mod engine;

pub use accumulator::{KeyState, WindowAccumulator, WindowBook};
pub use engine::{AggregationEngine, EngineConfig, EngineHandle, EngineStopped};
