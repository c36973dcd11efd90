//! In-process cache tier
//!
//! Holds the latest `AggregatedData` per key with bounded retention:
//! - entries older than `retention` are never returned and are evicted on access
//! - at most `max_entries` keys are held; the least recently written goes first

use crate::domain::errors::PipelineError;
use crate::domain::repositories::CacheTier;
use crate::domain::types::{AggregatedData, PairKey};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

struct Entry {
    data: AggregatedData,
    stored_at: Instant,
}

pub struct InMemoryCache {
    entries: RwLock<HashMap<PairKey, Entry>>,
    retention: Duration,
    max_entries: usize,
}

impl InMemoryCache {
    pub fn new(retention: Duration, max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            retention,
            max_entries: max_entries.max(1),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    fn expired(&self, entry: &Entry, now: Instant) -> bool {
        now.duration_since(entry.stored_at) >= self.retention
    }
}

#[async_trait]
impl CacheTier for InMemoryCache {
    async fn put(&self, key: &PairKey, data: &AggregatedData) -> Result<(), PipelineError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        entries.retain(|_, entry| now.duration_since(entry.stored_at) < self.retention);

        if !entries.contains_key(key) && entries.len() >= self.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.stored_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }

        entries.insert(
            key.clone(),
            Entry {
                data: data.clone(),
                stored_at: now,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &PairKey) -> Result<Option<AggregatedData>, PipelineError> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if !self.expired(entry, now) => return Ok(Some(entry.data.clone())),
                Some(_) => {}
            }
        }

        self.entries.write().await.remove(key);
        Ok(None)
    }

    async fn remove(&self, key: &PairKey) -> Result<(), PipelineError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<(), PipelineError> {
        Ok(())
    }
}
