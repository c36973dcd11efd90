use crate::domain::types::{Mode, SystemStatus};
use crate::infrastructure::observability::Metrics;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use tokio::sync::{RwLock, broadcast};
use tracing::info;

pub const CACHE_COMPONENT: &str = "cache";
pub const STORE_COMPONENT: &str = "durable_store";

/// Event broadcast when health or mode changes
#[derive(Debug, Clone, PartialEq)]
pub enum HealthEvent {
    Connectivity {
        component: String,
        connected: bool,
        reason: Option<String>,
        timestamp: DateTime<Utc>,
    },
    ModeChanged {
        from: Mode,
        to: Mode,
        timestamp: DateTime<Utc>,
    },
}

/// Push-model health registry backing `SystemStatus`
pub struct StatusMonitor {
    cache_connected: RwLock<bool>,
    store_connected: RwLock<bool>,
    exchanges: RwLock<BTreeSet<String>>,
    mode: RwLock<Mode>,
    metrics: Metrics,
    event_tx: broadcast::Sender<HealthEvent>,
}

impl StatusMonitor {
    pub fn new(mode: Mode, metrics: Metrics) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        metrics.set_component_up(CACHE_COMPONENT, false);
        metrics.set_component_up(STORE_COMPONENT, false);
        Self {
            cache_connected: RwLock::new(false),
            store_connected: RwLock::new(false),
            exchanges: RwLock::new(BTreeSet::new()),
            mode: RwLock::new(mode),
            metrics,
            event_tx,
        }
    }

    pub async fn set_cache_connected(&self, connected: bool, reason: Option<String>) {
        let mut lock = self.cache_connected.write().await;
        if *lock != connected {
            *lock = connected;
            self.broadcast_change(CACHE_COMPONENT, connected, reason);
        }
    }

    pub async fn set_store_connected(&self, connected: bool, reason: Option<String>) {
        let mut lock = self.store_connected.write().await;
        if *lock != connected {
            *lock = connected;
            self.broadcast_change(STORE_COMPONENT, connected, reason);
        }
    }

    pub async fn set_exchange_connected(
        &self,
        exchange: &str,
        connected: bool,
        reason: Option<String>,
    ) {
        let mut exchanges = self.exchanges.write().await;
        let changed = if connected {
            exchanges.insert(exchange.to_string())
        } else {
            exchanges.remove(exchange)
        };
        if changed {
            self.broadcast_change(exchange, connected, reason);
        }
    }

    pub async fn set_mode(&self, mode: Mode) {
        let mut lock = self.mode.write().await;
        if *lock == mode {
            return;
        }
        let from = *lock;
        *lock = mode;
        info!("StatusMonitor: mode {} -> {}", from, mode);
        let _ = self.event_tx.send(HealthEvent::ModeChanged {
            from,
            to: mode,
            timestamp: Utc::now(),
        });
    }

    /// Fresh snapshot of the current flags
    pub async fn snapshot(&self) -> SystemStatus {
        SystemStatus {
            cache_connected: *self.cache_connected.read().await,
            store_connected: *self.store_connected.read().await,
            exchange_connected: self.exchanges.read().await.iter().cloned().collect(),
            mode: *self.mode.read().await,
        }
    }

    pub async fn mode(&self) -> Mode {
        *self.mode.read().await
    }

    /// Subscribe to health change events
    pub fn subscribe(&self) -> broadcast::Receiver<HealthEvent> {
        self.event_tx.subscribe()
    }

    fn broadcast_change(&self, component: &str, connected: bool, reason: Option<String>) {
        self.metrics.set_component_up(component, connected);

        info!(
            "StatusMonitor: {} is now {}{}",
            component,
            if connected { "connected" } else { "disconnected" },
            reason
                .as_ref()
                .map(|r| format!(" ({})", r))
                .unwrap_or_default()
        );

        let _ = self.event_tx.send(HealthEvent::Connectivity {
            component: component.to_string(),
            connected,
            reason,
            timestamp: Utc::now(),
        });
    }
}

impl Default for StatusMonitor {
    fn default() -> Self {
        Self::new(Mode::Live, Metrics::default())
    }
}
