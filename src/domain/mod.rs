// Pipeline error types
pub mod errors;

// Source interfaces
pub mod ports;

// Storage tier traits
pub mod repositories;

// Core market data types
pub mod types;

// Window alignment
pub mod window;
