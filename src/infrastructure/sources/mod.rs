//! Tick sources: exchange WebSocket feeds and the synthetic generator.

pub mod factory;
pub mod live;
pub mod synthetic;

pub use factory::ConfiguredSourceFactory;
pub use live::LiveTickSource;
pub use synthetic::SyntheticTickSource;
