pub mod aggregate_store;
pub mod database;

pub use aggregate_store::SqliteAggregateStore;
pub use database::Database;
