mod common;

use common::{FlakyCache, MemoryStore, ScriptedFactory, at, ms, settings, wait_until};
use marketflow::application::system::Pipeline;
use marketflow::domain::errors::QueryError;
use marketflow::domain::repositories::DurableStore;
use marketflow::domain::types::{Mode, PairKey, TimeRange};
use marketflow::infrastructure::cache::InMemoryCache;
use marketflow::infrastructure::observability::Metrics;
use marketflow::infrastructure::persistence::{Database, SqliteAggregateStore};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

const PAIR: &str = "BTCUSDT";

fn key() -> PairKey {
    PairKey::new("exchange1", PAIR)
}

async fn wait_for_ticks(pipeline: &Pipeline, count: u64) -> bool {
    let engine = pipeline.engine();
    wait_until(|| {
        let engine = engine.clone();
        async move {
            matches!(engine.open_window(&key()).await, Ok(Some(acc)) if acc.count() == count)
        }
    })
    .await
}

async fn wait_for_rows(store: &dyn DurableStore, count: usize) -> bool {
    wait_until(|| async move {
        store
            .query(&key(), TimeRange::new(at(0), at(3600)))
            .await
            .map(|rows| rows.len() == count)
            .unwrap_or(false)
    })
    .await
}

#[tokio::test]
async fn test_window_aggregate_reaches_both_tiers() {
    let db = Database::new("sqlite::memory:").await.unwrap();
    let store = Arc::new(SqliteAggregateStore::new(db.pool.clone()));
    let cache = Arc::new(InMemoryCache::new(Duration::from_secs(300), 100));
    let factory = ScriptedFactory::new("exchange1");

    let pipeline = Pipeline::start(
        settings(Mode::Live),
        cache.clone(),
        store.clone(),
        factory.clone(),
        Metrics::new().unwrap(),
    )
    .await
    .unwrap();
    assert!(factory.live.wait_subscribed().await);

    factory.live.push(PAIR, dec!(100), at(1)).await;
    factory.live.push(PAIR, dec!(110), at(2)).await;
    factory.live.push(PAIR, dec!(90), at(3)).await;
    assert!(wait_for_ticks(&pipeline, 3).await);

    pipeline.engine().close_due(ms(60)).await.unwrap();
    assert!(wait_for_rows(&*store, 1).await);

    let latest = tokio_test::assert_ok!(pipeline.query.get_latest("exchange1", PAIR).await);
    assert_eq!(latest.timestamp, at(60));
    assert_eq!(latest.average_price, dec!(100));
    assert_eq!(latest.max_price, dec!(110));
    assert_eq!(latest.min_price, dec!(90));
    assert!(!cache.is_empty().await);

    let status = pipeline.query.get_status().await;
    assert!(status.cache_connected);
    assert!(status.store_connected);
    assert_eq!(status.exchange_connected, vec!["exchange1".to_string()]);
    assert_eq!(status.mode, Mode::Live);

    assert!(pipeline.shutdown().await);
}

#[tokio::test]
async fn test_silent_window_emits_nothing() {
    let store = Arc::new(MemoryStore::default());
    let factory = ScriptedFactory::new("exchange1");
    let pipeline = Pipeline::start(
        settings(Mode::Live),
        Arc::new(InMemoryCache::new(Duration::from_secs(300), 100)),
        store.clone(),
        factory.clone(),
        Metrics::new().unwrap(),
    )
    .await
    .unwrap();
    assert!(factory.live.wait_subscribed().await);

    factory.live.push(PAIR, dec!(100), at(10)).await;
    assert!(wait_for_ticks(&pipeline, 1).await);
    pipeline.engine().close_due(ms(60)).await.unwrap();
    assert!(wait_for_rows(&*store, 1).await);

    // Nothing arrives in [60, 120)
    pipeline.engine().close_due(ms(120)).await.unwrap();

    factory.live.push(PAIR, dec!(105), at(130)).await;
    assert!(wait_for_ticks(&pipeline, 1).await);
    pipeline.engine().close_due(ms(180)).await.unwrap();
    assert!(wait_for_rows(&*store, 2).await);

    let timestamps: Vec<_> = store.rows().iter().map(|r| r.timestamp).collect();
    assert_eq!(timestamps, vec![at(60), at(180)]);

    assert!(pipeline.shutdown().await);
}

#[tokio::test]
async fn test_late_tick_never_changes_emitted_aggregate() {
    let store = Arc::new(MemoryStore::default());
    let factory = ScriptedFactory::new("exchange1");
    let metrics = Metrics::new().unwrap();
    let pipeline = Pipeline::start(
        settings(Mode::Live),
        Arc::new(InMemoryCache::new(Duration::from_secs(300), 100)),
        store.clone(),
        factory.clone(),
        metrics.clone(),
    )
    .await
    .unwrap();
    assert!(factory.live.wait_subscribed().await);

    factory.live.push(PAIR, dec!(100), at(5)).await;
    assert!(wait_for_ticks(&pipeline, 1).await);
    pipeline.engine().close_due(ms(60)).await.unwrap();
    assert!(wait_for_rows(&*store, 1).await);

    // Late for [0, 60), then a regular tick for [60, 120) behind it
    factory.live.push(PAIR, dec!(1000), at(30)).await;
    factory.live.push(PAIR, dec!(101), at(70)).await;
    assert!(wait_for_ticks(&pipeline, 1).await);

    assert_eq!(metrics.ticks_late_total.get(), 1);
    let stored = store.rows();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].max_price, dec!(100));

    let latest = pipeline.query.get_latest("exchange1", PAIR).await.unwrap();
    assert_eq!(latest.timestamp, at(60));
    assert_eq!(latest.average_price, dec!(100));

    assert!(pipeline.shutdown().await);
}

#[tokio::test]
async fn test_cache_outage_falls_back_to_store_and_recovers() {
    let store = Arc::new(MemoryStore::default());
    let cache = FlakyCache::new();
    let factory = ScriptedFactory::new("exchange1");
    let pipeline = Pipeline::start(
        settings(Mode::Live),
        cache.clone(),
        store.clone(),
        factory.clone(),
        Metrics::new().unwrap(),
    )
    .await
    .unwrap();
    assert!(factory.live.wait_subscribed().await);
    assert!(pipeline.query.get_status().await.cache_connected);

    cache.set_down(true);
    factory.live.push(PAIR, dec!(100), at(1)).await;
    assert!(wait_for_ticks(&pipeline, 1).await);
    pipeline.engine().close_due(ms(60)).await.unwrap();

    // Store write is unaffected by the cache outage
    assert!(wait_for_rows(&*store, 1).await);
    let status = pipeline.status.clone();
    let cache_flag = |expected: bool| {
        let status = status.clone();
        async move {
            wait_until(|| {
                let status = status.clone();
                async move { status.snapshot().await.cache_connected == expected }
            })
            .await
        }
    };
    assert!(cache_flag(false).await);

    let latest = pipeline.query.get_latest("exchange1", PAIR).await.unwrap();
    assert_eq!(latest.timestamp, at(60));

    cache.set_down(false);
    // Let the cache breaker cool down
    tokio::time::sleep(Duration::from_millis(100)).await;
    factory.live.push(PAIR, dec!(120), at(61)).await;
    assert!(wait_for_ticks(&pipeline, 1).await);
    pipeline.engine().close_due(ms(120)).await.unwrap();
    assert!(cache_flag(true).await);

    let latest = pipeline.query.get_latest("exchange1", PAIR).await.unwrap();
    assert_eq!(latest.timestamp, at(120));
    assert_eq!(latest.average_price, dec!(120));

    assert!(pipeline.shutdown().await);
}

#[tokio::test]
async fn test_mode_switch_preserves_open_window() {
    let store = Arc::new(MemoryStore::default());
    let factory = ScriptedFactory::new("exchange1");
    let pipeline = Pipeline::start(
        settings(Mode::Live),
        Arc::new(InMemoryCache::new(Duration::from_secs(300), 100)),
        store.clone(),
        factory.clone(),
        Metrics::new().unwrap(),
    )
    .await
    .unwrap();
    assert!(factory.live.wait_subscribed().await);

    factory.live.push(PAIR, dec!(100), at(1)).await;
    assert!(wait_for_ticks(&pipeline, 1).await);

    assert_eq!(pipeline.query.set_mode(Mode::Test).await.unwrap(), Mode::Test);
    assert!(factory.test.wait_subscribed().await);
    assert_eq!(
        pipeline.collector().active_sources().await.unwrap()[0].mode,
        Mode::Test
    );

    factory.test.push(PAIR, dec!(110), at(2)).await;
    factory.test.push(PAIR, dec!(90), at(3)).await;
    assert!(wait_for_ticks(&pipeline, 3).await);

    pipeline.engine().close_due(ms(60)).await.unwrap();
    assert!(wait_for_rows(&*store, 1).await);

    let aggregate = &store.rows()[0];
    assert_eq!(aggregate.average_price, dec!(100));
    assert_eq!(aggregate.max_price, dec!(110));
    assert_eq!(aggregate.min_price, dec!(90));
    assert_eq!(pipeline.query.get_status().await.mode, Mode::Test);

    assert!(pipeline.shutdown().await);
}

#[tokio::test]
async fn test_shutdown_flushes_open_window() {
    let store = Arc::new(MemoryStore::default());
    let factory = ScriptedFactory::new("exchange1");
    let pipeline = Pipeline::start(
        settings(Mode::Test),
        Arc::new(InMemoryCache::new(Duration::from_secs(300), 100)),
        store.clone(),
        factory.clone(),
        Metrics::new().unwrap(),
    )
    .await
    .unwrap();
    assert!(factory.test.wait_subscribed().await);

    factory.test.push(PAIR, dec!(50), at(1)).await;
    factory.test.push(PAIR, dec!(70), at(2)).await;
    assert!(wait_for_ticks(&pipeline, 2).await);

    assert!(pipeline.shutdown().await);

    let rows = store.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].timestamp, at(60));
    assert_eq!(rows[0].average_price, dec!(60));
}

#[tokio::test]
async fn test_unknown_key_and_inverted_range() {
    let factory = ScriptedFactory::new("exchange1");
    let pipeline = Pipeline::start(
        settings(Mode::Live),
        Arc::new(InMemoryCache::new(Duration::from_secs(300), 100)),
        Arc::new(MemoryStore::default()),
        factory,
        Metrics::new().unwrap(),
    )
    .await
    .unwrap();

    assert!(matches!(
        pipeline.query.get_latest("exchange9", PAIR).await,
        Err(QueryError::NotFound { .. })
    ));
    assert!(matches!(
        pipeline
            .query
            .get_history("exchange1", PAIR, TimeRange::new(at(120), at(60)))
            .await,
        Err(QueryError::InvalidRange { .. })
    ));

    assert!(pipeline.shutdown().await);
}

#[tokio::test]
async fn test_restart_primes_cache_from_store() {
    let store = Arc::new(MemoryStore::default());
    let factory = ScriptedFactory::new("exchange1");
    let pipeline = Pipeline::start(
        settings(Mode::Live),
        Arc::new(InMemoryCache::new(Duration::from_secs(300), 100)),
        store.clone(),
        factory.clone(),
        Metrics::new().unwrap(),
    )
    .await
    .unwrap();
    assert!(factory.live.wait_subscribed().await);
    factory.live.push(PAIR, dec!(42), at(1)).await;
    assert!(wait_for_ticks(&pipeline, 1).await);
    assert!(pipeline.shutdown().await);

    let cache = Arc::new(InMemoryCache::new(Duration::from_secs(300), 100));
    let restarted = Pipeline::start(
        settings(Mode::Live),
        cache.clone(),
        store.clone(),
        ScriptedFactory::new("exchange1"),
        Metrics::new().unwrap(),
    )
    .await
    .unwrap();

    assert_eq!(cache.len().await, 1);
    let latest = restarted.query.get_latest("exchange1", PAIR).await.unwrap();
    assert_eq!(latest.average_price, dec!(42));

    assert!(restarted.shutdown().await);
}
