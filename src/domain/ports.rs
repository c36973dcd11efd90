use crate::domain::errors::PipelineError;
use crate::domain::types::{MarketData, Mode};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::Receiver;

/// Identity of an active source inside the collector.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId {
    pub exchange: String,
    pub mode: Mode,
}

impl SourceId {
    pub fn new(exchange: impl Into<String>, mode: Mode) -> Self {
        Self {
            exchange: exchange.into(),
            mode,
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.exchange, self.mode)
    }
}

/// A producer of ticks for one exchange.
///
/// `subscribe` opens a fresh stream each time it is called. The stream ends
/// (the receiver yields `None`) when the underlying connection drops; the
/// collector decides whether to resubscribe.
#[async_trait]
pub trait TickSource: Send + Sync {
    fn id(&self) -> SourceId;
    async fn subscribe(&self) -> Result<Receiver<MarketData>, PipelineError>;
}

/// Builds the source set for a mode.
pub trait SourceFactory: Send + Sync {
    fn sources_for(&self, mode: Mode) -> Vec<Arc<dyn TickSource>>;
}
