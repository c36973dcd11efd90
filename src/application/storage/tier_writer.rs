//! Dual-tier persistence of emitted aggregates.
//!
//! The cache and the durable store are written by independent tasks so a
//! stalled tier never delays the other. The cache is best-effort: a full
//! queue drops the write. The store keeps an in-memory backlog that is
//! retried until the store recovers or shutdown ends the process.

use crate::application::monitoring::{CACHE_COMPONENT, STORE_COMPONENT, StatusMonitor};
use crate::config::StorageEnvConfig;
use crate::domain::errors::PipelineError;
use crate::domain::repositories::{CacheTier, DurableStore};
use crate::domain::types::AggregatedData;
use crate::infrastructure::core::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use crate::infrastructure::observability::Metrics;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct TierPolicy {
    pub write_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub backlog_capacity: usize,
    /// How often a non-empty store backlog is retried
    pub probe_interval: Duration,
    pub breaker_cooldown: Duration,
}

impl TierPolicy {
    pub fn from_config(config: &StorageEnvConfig) -> Self {
        Self {
            write_timeout: config.tier_write_timeout,
            max_retries: config.tier_max_retries,
            retry_backoff: config.tier_retry_backoff,
            backlog_capacity: config.store_backlog_capacity,
            probe_interval: Duration::from_secs(1),
            breaker_cooldown: Duration::from_secs(5),
        }
    }

    fn breaker(&self, tier: &str) -> CircuitBreaker {
        CircuitBreaker::new(
            tier,
            self.max_retries as usize + 1,
            1,
            self.breaker_cooldown,
        )
    }
}

impl Default for TierPolicy {
    fn default() -> Self {
        Self::from_config(&StorageEnvConfig::default())
    }
}

pub struct TierWriter {
    dispatcher: JoinHandle<()>,
    cache_task: JoinHandle<()>,
    store_task: JoinHandle<usize>,
}

impl TierWriter {
    pub fn start(
        input: mpsc::Receiver<AggregatedData>,
        cache: Arc<dyn CacheTier>,
        store: Arc<dyn DurableStore>,
        status: Arc<StatusMonitor>,
        metrics: Metrics,
        policy: TierPolicy,
    ) -> Self {
        let (cache_tx, cache_rx) = mpsc::channel(policy.backlog_capacity.max(1));
        let (store_tx, store_rx) = mpsc::channel(policy.backlog_capacity.max(1));

        let cache_task = tokio::spawn(run_cache_writer(
            cache_rx,
            cache,
            status.clone(),
            metrics.clone(),
            policy.clone(),
        ));
        let store_task = tokio::spawn(run_store_writer(store_rx, store, status, metrics, policy));
        let dispatcher = tokio::spawn(dispatch(input, cache_tx, store_tx));

        Self {
            dispatcher,
            cache_task,
            store_task,
        }
    }

    /// Wait until the input channel closed and both tiers drained.
    /// Returns the number of aggregates the store never accepted.
    pub async fn join(self) -> usize {
        let _ = self.dispatcher.await;
        let _ = self.cache_task.await;
        match self.store_task.await {
            Ok(undelivered) => undelivered,
            Err(e) => {
                error!("TierWriter: store task failed: {}", e);
                0
            }
        }
    }
}

async fn dispatch(
    mut input: mpsc::Receiver<AggregatedData>,
    cache_tx: mpsc::Sender<AggregatedData>,
    store_tx: mpsc::Sender<AggregatedData>,
) {
    while let Some(aggregate) = input.recv().await {
        if let Err(mpsc::error::TrySendError::Full(dropped)) = cache_tx.try_send(aggregate.clone())
        {
            debug!("TierWriter: cache queue full, skipping {}", dropped.key());
        }
        if store_tx.send(aggregate).await.is_err() {
            error!("TierWriter: store task gone, stopping dispatch");
            break;
        }
    }
    debug!("TierWriter: input closed");
}

/// Run `op` through `breaker`, retrying with exponential backoff.
async fn write_with_retry<T, F, Fut>(
    breaker: &CircuitBreaker,
    tier: &str,
    policy: &TierPolicy,
    mut op: F,
) -> Result<T, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let mut attempt = 0u32;
    loop {
        let err = match breaker.call(policy.write_timeout, op()).await {
            Ok(value) => return Ok(value),
            Err(CircuitBreakerError::Open(reason)) => {
                return Err(PipelineError::connectivity(tier, reason));
            }
            Err(CircuitBreakerError::Timeout(after)) => {
                PipelineError::connectivity(tier, format!("write timed out after {:?}", after))
            }
            Err(CircuitBreakerError::Inner(e)) => e,
        };

        if attempt >= policy.max_retries {
            return Err(err);
        }
        let delay = policy.retry_backoff * 2u32.saturating_pow(attempt);
        debug!("{}: attempt {} failed ({}), retrying in {:?}", tier, attempt + 1, err, delay);
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

async fn run_cache_writer(
    mut rx: mpsc::Receiver<AggregatedData>,
    cache: Arc<dyn CacheTier>,
    status: Arc<StatusMonitor>,
    metrics: Metrics,
    policy: TierPolicy,
) {
    let breaker = policy.breaker(CACHE_COMPONENT);

    while let Some(aggregate) = rx.recv().await {
        let key = aggregate.key();
        let result = write_with_retry(&breaker, CACHE_COMPONENT, &policy, || {
            cache.put(&key, &aggregate)
        })
        .await;

        match result {
            Ok(()) => status.set_cache_connected(true, None).await,
            Err(e) => {
                metrics.inc_tier_failure(CACHE_COMPONENT);
                warn!("TierWriter: cache write for {} failed: {}", key, e);
                status.set_cache_connected(false, Some(e.to_string())).await;
                // The previous window would otherwise shadow the newer row in the store
                match tokio::time::timeout(policy.write_timeout, cache.remove(&key)).await {
                    Ok(Ok(())) => debug!("TierWriter: evicted stale cache entry for {}", key),
                    Ok(Err(e)) => debug!("TierWriter: could not evict {}: {}", key, e),
                    Err(_) => debug!("TierWriter: eviction of {} timed out", key),
                }
            }
        }
    }
    debug!("TierWriter: cache writer stopped");
}

async fn run_store_writer(
    mut rx: mpsc::Receiver<AggregatedData>,
    store: Arc<dyn DurableStore>,
    status: Arc<StatusMonitor>,
    metrics: Metrics,
    policy: TierPolicy,
) -> usize {
    let breaker = policy.breaker(STORE_COMPONENT);
    let mut backlog: VecDeque<AggregatedData> = VecDeque::new();
    let mut probe = tokio::time::interval(policy.probe_interval);
    probe.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(aggregate) => {
                    push_bounded(&mut backlog, aggregate, policy.backlog_capacity, &metrics);
                    drain(&mut backlog, &*store, &breaker, &status, &metrics, &policy).await;
                }
                None => break,
            },
            _ = probe.tick(), if !backlog.is_empty() => {
                breaker.reset();
                drain(&mut backlog, &*store, &breaker, &status, &metrics, &policy).await;
            }
        }
    }

    // One last attempt for whatever is still queued
    if !backlog.is_empty() {
        breaker.reset();
        drain(&mut backlog, &*store, &breaker, &status, &metrics, &policy).await;
    }
    if !backlog.is_empty() {
        error!(
            "TierWriter: {} aggregates could not be persisted before shutdown",
            backlog.len()
        );
    }
    info!("TierWriter: store writer stopped");
    backlog.len()
}

fn push_bounded(
    backlog: &mut VecDeque<AggregatedData>,
    aggregate: AggregatedData,
    capacity: usize,
    metrics: &Metrics,
) {
    if backlog.len() >= capacity.max(1)
        && let Some(evicted) = backlog.pop_front()
    {
        metrics.inc_tier_failure(STORE_COMPONENT);
        warn!(
            "TierWriter: store backlog full, discarding oldest aggregate {} @ {}",
            evicted.key(),
            evicted.timestamp
        );
    }
    backlog.push_back(aggregate);
}

/// Write backlog entries in order until empty or the store fails.
async fn drain(
    backlog: &mut VecDeque<AggregatedData>,
    store: &dyn DurableStore,
    breaker: &CircuitBreaker,
    status: &StatusMonitor,
    metrics: &Metrics,
    policy: &TierPolicy,
) {
    while let Some(next) = backlog.front() {
        let result = write_with_retry(breaker, STORE_COMPONENT, policy, || store.append(next)).await;
        match result {
            Ok(inserted) => {
                if !inserted {
                    debug!(
                        "TierWriter: {} @ {} already stored",
                        next.key(),
                        next.timestamp
                    );
                }
                backlog.pop_front();
                status.set_store_connected(true, None).await;
            }
            Err(e) => {
                metrics.inc_tier_failure(STORE_COMPONENT);
                warn!(
                    "TierWriter: store write failed ({}), {} aggregates backlogged",
                    e,
                    backlog.len()
                );
                status.set_store_connected(false, Some(e.to_string())).await;
                return;
            }
        }
    }
}
