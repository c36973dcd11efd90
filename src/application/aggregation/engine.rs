//! Sharded aggregation engine.
//!
//! Each key is owned by exactly one shard task (chosen by hash), which is
//! the only mutator of that key's window state. A shared scheduler sends
//! `CloseDue(boundary)` to every shard at each epoch-aligned boundary.

use crate::application::aggregation::accumulator::{WindowAccumulator, WindowBook};
use crate::domain::types::{AggregatedData, MarketData, PairKey};
use crate::domain::window::WindowGrid;
use crate::infrastructure::observability::Metrics;
use chrono::Utc;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("aggregation engine stopped")]
pub struct EngineStopped;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub grid: WindowGrid,
    pub shards: usize,
    pub channel_capacity: usize,
    /// Drive `CloseDue` from the wall clock. Tests disable it and call
    /// `EngineHandle::close_due` directly.
    pub run_scheduler: bool,
}

enum ShardMessage {
    Tick(MarketData),
    CloseDue(i64),
    Flush(oneshot::Sender<usize>),
    Inspect(PairKey, oneshot::Sender<Option<WindowAccumulator>>),
    Stop,
}

/// Cheap clonable entry point into the shards
#[derive(Clone)]
pub struct EngineHandle {
    shards: Arc<Vec<mpsc::Sender<ShardMessage>>>,
}

impl EngineHandle {
    fn shard_for(&self, key: &PairKey) -> &mpsc::Sender<ShardMessage> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let idx = (hasher.finish() % self.shards.len() as u64) as usize;
        &self.shards[idx]
    }

    /// Route a tick to the shard owning its key. Waits when the shard is busy.
    pub async fn submit(&self, tick: MarketData) -> Result<(), EngineStopped> {
        self.shard_for(&tick.key())
            .send(ShardMessage::Tick(tick))
            .await
            .map_err(|_| EngineStopped)
    }

    /// Close every window ending at or before `boundary_ms`
    pub async fn close_due(&self, boundary_ms: i64) -> Result<(), EngineStopped> {
        for shard in self.shards.iter() {
            shard
                .send(ShardMessage::CloseDue(boundary_ms))
                .await
                .map_err(|_| EngineStopped)?;
        }
        Ok(())
    }

    /// Close all open windows early. Returns how many were emitted.
    pub async fn flush(&self) -> Result<usize, EngineStopped> {
        let mut replies = Vec::with_capacity(self.shards.len());
        for shard in self.shards.iter() {
            let (tx, rx) = oneshot::channel();
            shard
                .send(ShardMessage::Flush(tx))
                .await
                .map_err(|_| EngineStopped)?;
            replies.push(rx);
        }

        let mut total = 0;
        for rx in replies {
            total += rx.await.map_err(|_| EngineStopped)?;
        }
        Ok(total)
    }

    /// Snapshot of the window currently open for `key`
    pub async fn open_window(&self, key: &PairKey) -> Result<Option<WindowAccumulator>, EngineStopped> {
        let (tx, rx) = oneshot::channel();
        self.shard_for(key)
            .send(ShardMessage::Inspect(key.clone(), tx))
            .await
            .map_err(|_| EngineStopped)?;
        rx.await.map_err(|_| EngineStopped)
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

pub struct AggregationEngine {
    handle: EngineHandle,
    shard_tasks: Vec<JoinHandle<()>>,
    scheduler: Option<(watch::Sender<bool>, JoinHandle<()>)>,
}

impl AggregationEngine {
    pub fn start(
        config: EngineConfig,
        output: mpsc::Sender<AggregatedData>,
        metrics: Metrics,
    ) -> Self {
        let shard_count = config.shards.max(1);
        let mut senders = Vec::with_capacity(shard_count);
        let mut shard_tasks = Vec::with_capacity(shard_count);

        for id in 0..shard_count {
            let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
            let book = WindowBook::new(config.grid);
            shard_tasks.push(tokio::spawn(run_shard(
                id,
                book,
                rx,
                output.clone(),
                metrics.clone(),
            )));
            senders.push(tx);
        }
        drop(output);

        let handle = EngineHandle {
            shards: Arc::new(senders),
        };

        let scheduler = config.run_scheduler.then(|| {
            let (stop_tx, stop_rx) = watch::channel(false);
            let task = tokio::spawn(run_scheduler(config.grid, handle.clone(), stop_rx));
            (stop_tx, task)
        });

        info!(
            "AggregationEngine: {} shards, {}ms windows",
            shard_count,
            config.grid.length_ms()
        );

        Self {
            handle,
            shard_tasks,
            scheduler,
        }
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Stop the scheduler, flush open windows, then stop every shard.
    /// Returns the number of windows emitted by the flush.
    pub async fn shutdown(self) -> usize {
        if let Some((stop_tx, task)) = self.scheduler {
            let _ = stop_tx.send(true);
            let _ = task.await;
        }

        let flushed = match self.handle.flush().await {
            Ok(n) => n,
            Err(e) => {
                warn!("AggregationEngine: flush failed: {}", e);
                0
            }
        };

        for shard in self.handle.shards.iter() {
            let _ = shard.send(ShardMessage::Stop).await;
        }
        for task in self.shard_tasks {
            let _ = task.await;
        }

        info!("AggregationEngine: stopped ({} windows flushed)", flushed);
        flushed
    }
}

async fn run_shard(
    id: usize,
    mut book: WindowBook,
    mut rx: mpsc::Receiver<ShardMessage>,
    output: mpsc::Sender<AggregatedData>,
    metrics: Metrics,
) {
    while let Some(msg) = rx.recv().await {
        match msg {
            ShardMessage::Tick(tick) => match book.on_tick(&tick) {
                Ok(Some(closed)) => emit(&output, &metrics, closed).await,
                Ok(None) => {}
                Err(e) => {
                    metrics.ticks_late_total.inc();
                    debug!("Shard {}: {}", id, e);
                }
            },
            ShardMessage::CloseDue(boundary_ms) => {
                for closed in book.close_due(boundary_ms) {
                    emit(&output, &metrics, closed).await;
                }
            }
            ShardMessage::Flush(reply) => {
                let closed = book.flush();
                let count = closed.len();
                for aggregate in closed {
                    emit(&output, &metrics, aggregate).await;
                }
                let _ = reply.send(count);
            }
            ShardMessage::Inspect(key, reply) => {
                let _ = reply.send(book.open_window(&key));
            }
            ShardMessage::Stop => break,
        }
    }
    debug!("Shard {}: exiting", id);
}

async fn emit(output: &mpsc::Sender<AggregatedData>, metrics: &Metrics, aggregate: AggregatedData) {
    metrics.windows_emitted_total.inc();
    debug!(
        "Window closed {}:{} @ {} avg={} min={} max={}",
        aggregate.exchange,
        aggregate.pair_name,
        aggregate.timestamp,
        aggregate.average_price,
        aggregate.min_price,
        aggregate.max_price
    );
    if output.send(aggregate).await.is_err() {
        warn!("Aggregate dropped: tier writer is gone");
    }
}

async fn run_scheduler(grid: WindowGrid, handle: EngineHandle, mut stop: watch::Receiver<bool>) {
    loop {
        let now_ms = Utc::now().timestamp_millis();
        let boundary = grid.next_boundary_after(now_ms);
        let wait = Duration::from_millis((boundary - now_ms).max(0) as u64);

        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                if handle.close_due(boundary).await.is_err() {
                    break;
                }
            }
            _ = stop.changed() => break,
        }
    }
    debug!("Boundary scheduler stopped");
}

/// A one-shard handle whose queue is read only by the test holding it
#[cfg(test)]
pub(crate) struct StalledShard(mpsc::Receiver<ShardMessage>);

#[cfg(test)]
impl StalledShard {
    pub(crate) fn handle(capacity: usize) -> (EngineHandle, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = EngineHandle {
            shards: Arc::new(vec![tx]),
        };
        (handle, Self(rx))
    }

    pub(crate) async fn next_tick(&mut self) -> Option<MarketData> {
        while let Some(msg) = self.0.recv().await {
            if let ShardMessage::Tick(tick) = msg {
                return Some(tick);
            }
        }
        None
    }

    pub(crate) fn queued_ticks(&mut self) -> Vec<MarketData> {
        let mut ticks = Vec::new();
        while let Ok(msg) = self.0.try_recv() {
            if let ShardMessage::Tick(tick) = msg {
                ticks.push(tick);
            }
        }
        ticks
    }
}
