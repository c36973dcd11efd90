use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

pub mod pipeline;

pub use pipeline::{Pipeline, PipelineSettings};

use crate::application::bootstrap::{PersistenceBootstrap, PersistenceHandle};
use crate::config::Config;
use crate::infrastructure::observability::{Metrics, MetricsReporter};
use crate::infrastructure::sources::ConfiguredSourceFactory;

pub struct Application {
    pub config: Config,
    pub persistence: PersistenceHandle,
    pub metrics: Metrics,
}

/// Running system: the pipeline plus the optional metrics reporter.
pub struct SystemHandle {
    pub pipeline: Pipeline,
    reporter: Option<(watch::Sender<bool>, JoinHandle<()>)>,
}

impl Application {
    pub async fn build(config: Config) -> Result<Self> {
        info!("Building MarketFlow Application (Mode: {})...", config.mode);

        let metrics = Metrics::new()?;
        let persistence = PersistenceBootstrap::init(&config.storage).await?;

        Ok(Self {
            config,
            persistence,
            metrics,
        })
    }

    pub async fn start(self) -> Result<SystemHandle> {
        let settings = PipelineSettings::from_config(&self.config)?;
        let factory = Arc::new(ConfiguredSourceFactory::new(
            &self.config.exchanges,
            self.config.pipeline.test_tick_interval,
        ));

        let pipeline = Pipeline::start(
            settings,
            self.persistence.cache.clone(),
            self.persistence.store.clone(),
            factory,
            self.metrics.clone(),
        )
        .await
        .context("Failed to start pipeline")?;

        let reporter = if self.config.observability.enabled {
            let reporter = MetricsReporter::new(
                self.metrics.clone(),
                pipeline.status.clone(),
                self.config.exchanges.exchange_names(),
                self.config.observability.interval_secs,
            );
            let (stop_tx, stop_rx) = watch::channel(false);
            let task = tokio::spawn(reporter.run(stop_rx));
            info!(
                "Metrics reporter started (interval: {}s)",
                self.config.observability.interval_secs
            );
            Some((stop_tx, task))
        } else {
            info!("Metrics reporting disabled.");
            None
        };

        Ok(SystemHandle { pipeline, reporter })
    }
}

impl SystemHandle {
    pub async fn shutdown(self) -> bool {
        if let Some((stop_tx, task)) = self.reporter {
            let _ = stop_tx.send(true);
            let _ = task.await;
        }
        self.pipeline.shutdown().await
    }
}
