//! Fan-in of every active tick source into the aggregation engine.
//!
//! Each source gets two tasks:
//! - a pump that (re)subscribes with backoff, tracks liveness and pushes ticks
//!   into a bounded ring
//! - a forwarder that drains the ring in order, validates and submits to the engine
//!
//! The ring is a `broadcast` channel with one receiver: when the forwarder
//! lags, the oldest ticks are overwritten and reported as `Lagged(n)`.

use crate::application::aggregation::EngineHandle;
use crate::application::monitoring::{LivenessTracker, StatusMonitor};
use crate::domain::errors::PipelineError;
use crate::domain::ports::{SourceId, TickSource};
use crate::domain::types::MarketData;
use crate::infrastructure::observability::Metrics;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("collector stopped")]
pub struct CollectorStopped;

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Per-source ring size. Rounded up to the next power of two by `broadcast`.
    pub buffer_capacity: usize,
    pub liveness_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// How far past the wall clock a tick timestamp may be
    pub future_tolerance: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 1024,
            liveness_timeout: Duration::from_secs(10),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            future_tolerance: Duration::from_secs(60),
        }
    }
}

enum CollectorCommand {
    Replace {
        remove: Vec<SourceId>,
        add: Vec<Arc<dyn TickSource>>,
        done: oneshot::Sender<()>,
    },
    ActiveSources(oneshot::Sender<Vec<SourceId>>),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct CollectorHandle {
    tx: mpsc::Sender<CollectorCommand>,
}

impl CollectorHandle {
    pub async fn add_source(&self, source: Arc<dyn TickSource>) -> Result<(), CollectorStopped> {
        self.replace_sources(Vec::new(), vec![source]).await
    }

    pub async fn remove_source(&self, id: SourceId) -> Result<(), CollectorStopped> {
        self.replace_sources(vec![id], Vec::new()).await
    }

    /// Stop `remove` (draining their buffers) and start `add`, as one command.
    /// Resolves once removed sources are fully drained and new pumps are running.
    pub async fn replace_sources(
        &self,
        remove: Vec<SourceId>,
        add: Vec<Arc<dyn TickSource>>,
    ) -> Result<(), CollectorStopped> {
        let (done, rx) = oneshot::channel();
        self.tx
            .send(CollectorCommand::Replace { remove, add, done })
            .await
            .map_err(|_| CollectorStopped)?;
        rx.await.map_err(|_| CollectorStopped)
    }

    pub async fn active_sources(&self) -> Result<Vec<SourceId>, CollectorStopped> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(CollectorCommand::ActiveSources(reply))
            .await
            .map_err(|_| CollectorStopped)?;
        rx.await.map_err(|_| CollectorStopped)
    }

    /// Stop every source and wait until all buffered ticks reached the engine.
    pub async fn shutdown(&self) -> Result<(), CollectorStopped> {
        let (done, rx) = oneshot::channel();
        self.tx
            .send(CollectorCommand::Shutdown(done))
            .await
            .map_err(|_| CollectorStopped)?;
        rx.await.map_err(|_| CollectorStopped)
    }
}

struct ActiveSource {
    stop: watch::Sender<bool>,
    pump: JoinHandle<()>,
    forwarder: JoinHandle<()>,
}

pub struct FanInCollector {
    config: CollectorConfig,
    engine: EngineHandle,
    status: Arc<StatusMonitor>,
    metrics: Metrics,
    sources: HashMap<SourceId, ActiveSource>,
}

impl FanInCollector {
    pub fn start(
        config: CollectorConfig,
        engine: EngineHandle,
        status: Arc<StatusMonitor>,
        metrics: Metrics,
    ) -> (CollectorHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(16);
        let collector = Self {
            config,
            engine,
            status,
            metrics,
            sources: HashMap::new(),
        };
        let task = tokio::spawn(collector.run(rx));
        (CollectorHandle { tx }, task)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<CollectorCommand>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                CollectorCommand::Replace { remove, add, done } => {
                    for id in remove {
                        self.stop_source(&id).await;
                    }
                    for source in add {
                        self.start_source(source);
                    }
                    let _ = done.send(());
                }
                CollectorCommand::ActiveSources(reply) => {
                    let mut ids: Vec<SourceId> = self.sources.keys().cloned().collect();
                    ids.sort();
                    let _ = reply.send(ids);
                }
                CollectorCommand::Shutdown(done) => {
                    self.stop_all().await;
                    let _ = done.send(());
                    break;
                }
            }
        }

        // Handles dropped without an explicit shutdown
        self.stop_all().await;
        info!("FanInCollector: stopped");
    }

    fn start_source(&mut self, source: Arc<dyn TickSource>) {
        let id = source.id();
        if self.sources.contains_key(&id) {
            debug!("FanInCollector: {} already active", id);
            return;
        }

        let (ring_tx, ring_rx) = broadcast::channel(self.config.buffer_capacity.max(1));
        let (stop_tx, stop_rx) = watch::channel(false);

        let pump = tokio::spawn(run_pump(
            source,
            ring_tx,
            stop_rx,
            self.config.clone(),
            self.status.clone(),
            self.metrics.clone(),
        ));
        let forwarder = tokio::spawn(run_forwarder(
            id.clone(),
            ring_rx,
            self.engine.clone(),
            self.metrics.clone(),
            self.config.future_tolerance,
        ));

        info!("FanInCollector: started {}", id);
        self.sources.insert(
            id,
            ActiveSource {
                stop: stop_tx,
                pump,
                forwarder,
            },
        );
    }

    async fn stop_source(&mut self, id: &SourceId) {
        let Some(active) = self.sources.remove(id) else {
            debug!("FanInCollector: {} is not active", id);
            return;
        };

        let _ = active.stop.send(true);
        // Pump exit drops the ring sender; the forwarder then drains and exits
        let _ = active.pump.await;
        let _ = active.forwarder.await;

        if !self.sources.keys().any(|other| other.exchange == id.exchange) {
            self.status
                .set_exchange_connected(&id.exchange, false, Some("source stopped".to_string()))
                .await;
        }
        info!("FanInCollector: stopped {}", id);
    }

    async fn stop_all(&mut self) {
        let ids: Vec<SourceId> = self.sources.keys().cloned().collect();
        for id in ids {
            self.stop_source(&id).await;
        }
    }
}

async fn run_pump(
    source: Arc<dyn TickSource>,
    ring: broadcast::Sender<MarketData>,
    mut stop: watch::Receiver<bool>,
    config: CollectorConfig,
    status: Arc<StatusMonitor>,
    metrics: Metrics,
) {
    let id = source.id();
    let exchange = id.exchange.clone();
    let mut tracker = LivenessTracker::new(&exchange, config.liveness_timeout);
    let mut backoff = config.initial_backoff;
    let check_period = (config.liveness_timeout / 2).max(Duration::from_millis(10));

    'subscribe: loop {
        if *stop.borrow() {
            break;
        }

        let subscribed = tokio::select! {
            result = source.subscribe() => result,
            _ = stop.changed() => break 'subscribe,
        };

        let mut stream = match subscribed {
            Ok(rx) => {
                info!("{}: subscribed", id);
                backoff = config.initial_backoff;
                rx
            }
            Err(e) => {
                warn!("{}: subscribe failed: {}. Retrying in {:?}", id, e, backoff);
                if !sleep_or_stop(backoff, &mut stop).await {
                    break;
                }
                backoff = (backoff * 2).min(config.max_backoff);
                continue;
            }
        };

        let mut liveness = tokio::time::interval(check_period);
        loop {
            tokio::select! {
                biased;
                _ = stop.changed() => break 'subscribe,
                maybe_tick = stream.recv() => match maybe_tick {
                    Some(tick) => {
                        metrics.inc_ingested(&exchange);
                        if tracker.observe(Instant::now()) {
                            status.set_exchange_connected(&exchange, true, None).await;
                        }
                        // Err only when the forwarder is gone
                        if ring.send(tick).is_err() {
                            break 'subscribe;
                        }
                    }
                    None => {
                        let reason = PipelineError::connectivity(exchange.clone(), "stream ended");
                        warn!("{}: {}. Resubscribing in {:?}", id, reason, backoff);
                        if tracker.reset() {
                            status
                                .set_exchange_connected(&exchange, false, Some(reason.to_string()))
                                .await;
                        }
                        if !sleep_or_stop(backoff, &mut stop).await {
                            break 'subscribe;
                        }
                        backoff = (backoff * 2).min(config.max_backoff);
                        continue 'subscribe;
                    }
                },
                _ = liveness.tick() => {
                    if tracker.check(Instant::now()) {
                        status
                            .set_exchange_connected(
                                &exchange,
                                false,
                                Some(format!("no ticks for {:?}", tracker.silence_threshold())),
                            )
                            .await;
                    }
                }
            }
        }
    }

    debug!("{}: pump exiting", id);
}

/// Returns false if `stop` fired before `delay` elapsed.
async fn sleep_or_stop(delay: Duration, stop: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => !*stop.borrow(),
        _ = stop.changed() => false,
    }
}

async fn run_forwarder(
    id: SourceId,
    mut ring: broadcast::Receiver<MarketData>,
    engine: EngineHandle,
    metrics: Metrics,
    future_tolerance: Duration,
) {
    let tolerance = chrono::Duration::from_std(future_tolerance).unwrap_or(chrono::Duration::days(1));
    loop {
        match ring.recv().await {
            Ok(tick) => {
                let latest = Utc::now()
                    .checked_add_signed(tolerance)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                if let Err(e) = validate(&id, &tick, latest) {
                    metrics.ticks_invalid_total.inc();
                    debug!("{}: {}", id, e);
                    continue;
                }
                if engine.submit(tick).await.is_err() {
                    warn!("{}: engine stopped, forwarder exiting", id);
                    break;
                }
            }
            Err(RecvError::Lagged(dropped)) => {
                metrics.inc_dropped(&id.exchange, dropped);
                warn!("{}: buffer full, dropped {} oldest ticks", id, dropped);
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("{}: forwarder drained", id);
}

/// `latest` is the newest timestamp accepted. A tick stamped past it would
/// open a window the scheduler never reaches and turn every on-time tick late.
fn validate(id: &SourceId, tick: &MarketData, latest: DateTime<Utc>) -> Result<(), PipelineError> {
    if tick.exchange != id.exchange {
        return Err(PipelineError::InvalidTick {
            exchange: id.exchange.clone(),
            reason: format!("tick tagged with foreign exchange '{}'", tick.exchange),
        });
    }
    if tick.timestamp > latest {
        return Err(PipelineError::InvalidTick {
            exchange: id.exchange.clone(),
            reason: format!("timestamp {} is in the future", tick.timestamp),
        });
    }
    tick.validate()
}
