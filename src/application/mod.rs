// Pipeline wiring and startup
pub mod bootstrap;
pub mod system;

// Ingestion: sources fan in to the engine
pub mod ingestion;

// Windowed aggregation
pub mod aggregation;

// Cache and durable store writers
pub mod storage;

// Health tracking
pub mod monitoring;

pub mod mode_controller;
pub mod query;
