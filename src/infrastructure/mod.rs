pub mod cache;
pub mod core;
pub mod observability;
pub mod persistence;
pub mod sources;
