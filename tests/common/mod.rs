//! Shared doubles for pipeline integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use marketflow::application::ingestion::CollectorConfig;
use marketflow::application::storage::TierPolicy;
use marketflow::application::system::PipelineSettings;
use marketflow::domain::errors::PipelineError;
use marketflow::domain::ports::{SourceFactory, SourceId, TickSource};
use marketflow::domain::repositories::{CacheTier, DurableStore};
use marketflow::domain::types::{AggregatedData, MarketData, Mode, PairKey, TimeRange};
use marketflow::domain::window::WindowGrid;
use marketflow::infrastructure::cache::InMemoryCache;
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const WAIT: Duration = Duration::from_secs(3);

/// 2024-01-01T00:00:00Z plus `secs`
pub fn at(secs: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(secs.into())
}

pub fn ms(secs: u32) -> i64 {
    at(secs).timestamp_millis()
}

pub fn settings(mode: Mode) -> PipelineSettings {
    PipelineSettings {
        mode,
        grid: WindowGrid::new(Duration::from_secs(60)).unwrap(),
        shards: 2,
        collector: CollectorConfig {
            buffer_capacity: 64,
            liveness_timeout: Duration::from_secs(5),
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
            future_tolerance: Duration::from_secs(60),
        },
        tiers: TierPolicy {
            write_timeout: Duration::from_millis(200),
            max_retries: 1,
            retry_backoff: Duration::from_millis(10),
            backlog_capacity: 100,
            probe_interval: Duration::from_millis(50),
            breaker_cooldown: Duration::from_millis(50),
        },
        shutdown_grace: Duration::from_secs(5),
        run_scheduler: false,
    }
}

/// Poll `check` until it returns true or `WAIT` elapses.
pub async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Source whose stream is fed by the test.
pub struct ScriptedSource {
    id: SourceId,
    feed: Mutex<Option<mpsc::Sender<MarketData>>>,
}

impl ScriptedSource {
    pub fn new(exchange: &str, mode: Mode) -> Arc<Self> {
        Arc::new(Self {
            id: SourceId::new(exchange, mode),
            feed: Mutex::new(None),
        })
    }

    fn sender(&self) -> Option<mpsc::Sender<MarketData>> {
        self.feed.lock().unwrap().clone()
    }

    pub async fn wait_subscribed(&self) -> bool {
        wait_until(|| async move { self.sender().is_some_and(|tx| !tx.is_closed()) }).await
    }

    pub async fn push(&self, pair: &str, price: Decimal, timestamp: DateTime<Utc>) {
        let tx = self.sender().expect("source not subscribed");
        tx.send(MarketData::new(self.id.exchange.clone(), pair, price, timestamp))
            .await
            .expect("collector dropped the stream");
    }
}

#[async_trait]
impl TickSource for ScriptedSource {
    fn id(&self) -> SourceId {
        self.id.clone()
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<MarketData>, PipelineError> {
        let (tx, rx) = mpsc::channel(256);
        *self.feed.lock().unwrap() = Some(tx);
        Ok(rx)
    }
}

/// One scripted source per mode.
pub struct ScriptedFactory {
    pub live: Arc<ScriptedSource>,
    pub test: Arc<ScriptedSource>,
}

impl ScriptedFactory {
    pub fn new(exchange: &str) -> Arc<Self> {
        Arc::new(Self {
            live: ScriptedSource::new(exchange, Mode::Live),
            test: ScriptedSource::new(exchange, Mode::Test),
        })
    }
}

impl SourceFactory for ScriptedFactory {
    fn sources_for(&self, mode: Mode) -> Vec<Arc<dyn TickSource>> {
        match mode {
            Mode::Live => vec![self.live.clone()],
            Mode::Test => vec![self.test.clone()],
        }
    }
}

/// Cache that can be switched off at runtime.
pub struct FlakyCache {
    inner: InMemoryCache,
    down: AtomicBool,
}

impl FlakyCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryCache::new(Duration::from_secs(300), 100),
            down: AtomicBool::new(false),
        })
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), PipelineError> {
        if self.down.load(Ordering::SeqCst) {
            Err(PipelineError::connectivity("cache", "connection refused"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheTier for FlakyCache {
    async fn put(&self, key: &PairKey, data: &AggregatedData) -> Result<(), PipelineError> {
        self.check()?;
        self.inner.put(key, data).await
    }

    async fn get(&self, key: &PairKey) -> Result<Option<AggregatedData>, PipelineError> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn remove(&self, key: &PairKey) -> Result<(), PipelineError> {
        self.check()?;
        self.inner.remove(key).await
    }

    async fn ping(&self) -> Result<(), PipelineError> {
        self.check()
    }
}

/// Durable store that keeps rows readable after `close`.
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<AggregatedData>>,
}

impl MemoryStore {
    pub fn rows(&self) -> Vec<AggregatedData> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn append(&self, data: &AggregatedData) -> Result<bool, PipelineError> {
        let mut rows = self.rows.lock().unwrap();
        let exists = rows.iter().any(|r| {
            r.exchange == data.exchange
                && r.pair_name == data.pair_name
                && r.timestamp == data.timestamp
        });
        if !exists {
            rows.push(data.clone());
        }
        Ok(!exists)
    }

    async fn query(
        &self,
        key: &PairKey,
        range: TimeRange,
    ) -> Result<Vec<AggregatedData>, PipelineError> {
        let mut rows: Vec<_> = self
            .rows()
            .into_iter()
            .filter(|r| r.key() == *key && range.contains(r.timestamp))
            .collect();
        rows.sort_by_key(|r| r.timestamp);
        Ok(rows)
    }

    async fn latest(&self, key: &PairKey) -> Result<Option<AggregatedData>, PipelineError> {
        Ok(self
            .rows()
            .into_iter()
            .filter(|r| r.key() == *key)
            .max_by_key(|r| r.timestamp))
    }

    async fn latest_per_key(&self) -> Result<Vec<AggregatedData>, PipelineError> {
        let mut latest: Vec<AggregatedData> = Vec::new();
        for row in self.rows() {
            match latest.iter_mut().find(|r| r.key() == row.key()) {
                Some(existing) if existing.timestamp < row.timestamp => *existing = row,
                Some(_) => {}
                None => latest.push(row),
            }
        }
        Ok(latest)
    }

    async fn ping(&self) -> Result<(), PipelineError> {
        Ok(())
    }

    async fn close(&self) {}
}
