//! Wiring of the full pipeline and its ordered shutdown.

use crate::application::aggregation::{AggregationEngine, EngineConfig, EngineHandle};
use crate::application::ingestion::{CollectorConfig, CollectorHandle, FanInCollector};
use crate::application::mode_controller::{ModeController, ModeHandle};
use crate::application::monitoring::StatusMonitor;
use crate::application::query::QueryService;
use crate::application::storage::{TierPolicy, TierWriter};
use crate::config::Config;
use crate::domain::errors::PipelineError;
use crate::domain::ports::SourceFactory;
use crate::domain::repositories::{CacheTier, DurableStore};
use crate::domain::types::Mode;
use crate::domain::window::WindowGrid;
use crate::infrastructure::observability::Metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const AGGREGATE_CHANNEL_CAPACITY: usize = 1024;

/// Everything the pipeline needs besides its tiers and sources.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub mode: Mode,
    pub grid: WindowGrid,
    pub shards: usize,
    pub collector: CollectorConfig,
    pub tiers: TierPolicy,
    pub shutdown_grace: Duration,
    /// Disabled in tests that drive window closes by hand
    pub run_scheduler: bool,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Result<Self, PipelineError> {
        Ok(Self {
            mode: config.mode,
            grid: WindowGrid::new(config.pipeline.window)?,
            shards: config.pipeline.aggregation_shards,
            collector: CollectorConfig {
                buffer_capacity: config.pipeline.source_buffer_capacity,
                liveness_timeout: config.pipeline.liveness_timeout,
                future_tolerance: config.pipeline.window,
                ..CollectorConfig::default()
            },
            tiers: TierPolicy::from_config(&config.storage),
            shutdown_grace: config.shutdown_grace,
            run_scheduler: true,
        })
    }
}

pub struct Pipeline {
    pub query: QueryService,
    pub status: Arc<StatusMonitor>,
    pub metrics: Metrics,
    engine: AggregationEngine,
    collector: CollectorHandle,
    collector_task: JoinHandle<()>,
    modes: ModeHandle,
    mode_task: JoinHandle<()>,
    writer: TierWriter,
    store: Arc<dyn DurableStore>,
    shutdown_grace: Duration,
}

impl Pipeline {
    pub async fn start(
        settings: PipelineSettings,
        cache: Arc<dyn CacheTier>,
        store: Arc<dyn DurableStore>,
        factory: Arc<dyn SourceFactory>,
        metrics: Metrics,
    ) -> Result<Self, PipelineError> {
        info!("Starting MarketFlow pipeline (mode: {})...", settings.mode);
        let status = Arc::new(StatusMonitor::new(settings.mode, metrics.clone()));

        // 1. Probe tiers. Neither is required to start.
        match cache.ping().await {
            Ok(()) => status.set_cache_connected(true, None).await,
            Err(e) => {
                warn!("Cache unavailable at startup: {}", e);
                status.set_cache_connected(false, Some(e.to_string())).await;
            }
        }
        match store.ping().await {
            Ok(()) => {
                status.set_store_connected(true, None).await;
                prime_cache(&*cache, &*store).await;
            }
            Err(e) => {
                warn!("Durable store unavailable at startup: {}", e);
                status.set_store_connected(false, Some(e.to_string())).await;
            }
        }

        // 2. Downstream first so nothing is produced before it has a consumer
        let (aggregate_tx, aggregate_rx) = mpsc::channel(AGGREGATE_CHANNEL_CAPACITY);
        let writer = TierWriter::start(
            aggregate_rx,
            cache.clone(),
            store.clone(),
            status.clone(),
            metrics.clone(),
            settings.tiers.clone(),
        );

        let engine = AggregationEngine::start(
            EngineConfig {
                grid: settings.grid,
                shards: settings.shards,
                channel_capacity: settings.collector.buffer_capacity,
                run_scheduler: settings.run_scheduler,
            },
            aggregate_tx,
            metrics.clone(),
        );

        let (collector, collector_task) = FanInCollector::start(
            settings.collector.clone(),
            engine.handle(),
            status.clone(),
            metrics.clone(),
        );

        let (modes, mode_task) =
            ModeController::start(settings.mode, factory, collector.clone(), status.clone())
                .await?;

        let query = QueryService::new(
            cache,
            store.clone(),
            status.clone(),
            modes.clone(),
            settings.tiers.write_timeout,
        );

        info!("MarketFlow pipeline running.");
        Ok(Self {
            query,
            status,
            metrics,
            engine,
            collector,
            collector_task,
            modes,
            mode_task,
            writer,
            store,
            shutdown_grace: settings.shutdown_grace,
        })
    }

    pub fn engine(&self) -> EngineHandle {
        self.engine.handle()
    }

    pub fn collector(&self) -> CollectorHandle {
        self.collector.clone()
    }

    /// Stop intake, drain buffers, flush open windows and persist them.
    ///
    /// Bounded by the shutdown grace period. Returns false if the grace
    /// period ran out before every step completed.
    pub async fn shutdown(self) -> bool {
        let grace = self.shutdown_grace;
        let store = self.store.clone();

        let completed = tokio::time::timeout(grace, self.shutdown_steps()).await.is_ok();
        if !completed {
            error!(
                "Shutdown grace period of {:?} elapsed; remaining aggregates are lost",
                grace
            );
        }

        info!("Step 5: Closing durable store...");
        store.close().await;
        completed
    }

    async fn shutdown_steps(self) {
        info!("Initiating graceful pipeline shutdown...");

        info!("Step 1: Stopping mode controller...");
        if let Err(e) = self.modes.shutdown().await {
            warn!("Mode controller already stopped: {}", e);
        }
        let _ = self.mode_task.await;

        info!("Step 2: Stopping sources and draining buffers...");
        if let Err(e) = self.collector.shutdown().await {
            warn!("Collector already stopped: {}", e);
        }
        let _ = self.collector_task.await;

        info!("Step 3: Flushing open windows...");
        let flushed = self.engine.shutdown().await;
        info!("{} open windows flushed", flushed);

        info!("Step 4: Persisting remaining aggregates...");
        let undelivered = self.writer.join().await;
        if undelivered > 0 {
            error!("{} aggregates were not persisted", undelivered);
        } else {
            info!("All aggregates persisted.");
        }
    }
}

/// Seed the cache with the latest stored aggregate per key so reads are
/// served from the cache right after a restart.
async fn prime_cache(cache: &dyn CacheTier, store: &dyn DurableStore) {
    let latest = match store.latest_per_key().await {
        Ok(rows) => rows,
        Err(e) => {
            warn!("Cache priming skipped: {}", e);
            return;
        }
    };

    let mut primed = 0usize;
    for aggregate in &latest {
        if cache.put(&aggregate.key(), aggregate).await.is_ok() {
            primed += 1;
        }
    }
    info!("Primed cache with {} of {} keys", primed, latest.len());
}
