use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::config::StorageEnvConfig;
use crate::domain::repositories::{CacheTier, DurableStore};
use crate::infrastructure::cache::InMemoryCache;
use crate::infrastructure::persistence::aggregate_store::SqliteAggregateStore;
use crate::infrastructure::persistence::database::Database;

pub struct PersistenceHandle {
    pub db: Database,
    pub store: Arc<dyn DurableStore>,
    pub cache: Arc<dyn CacheTier>,
}

pub struct PersistenceBootstrap;

impl PersistenceBootstrap {
    pub async fn init(config: &StorageEnvConfig) -> Result<PersistenceHandle> {
        info!("Initializing Database at {}", config.database_url);

        let db = Database::new(&config.database_url)
            .await
            .context("Failed to initialize database")?;

        let store = Arc::new(SqliteAggregateStore::new(db.pool.clone()));
        let cache = Arc::new(InMemoryCache::new(
            config.cache_retention,
            config.cache_max_entries,
        ));
        info!(
            "Cache tier ready (retention: {:?}, max keys: {})",
            config.cache_retention, config.cache_max_entries
        );

        Ok(PersistenceHandle { db, store, cache })
    }
}
