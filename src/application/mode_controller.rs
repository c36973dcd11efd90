//! Live/test source switching.
//!
//! A switch hands the collector a single replace command: it drains the
//! outgoing sources into the engine before the incoming ones start, and the
//! engine's open windows are left untouched.

use crate::application::ingestion::CollectorHandle;
use crate::application::monitoring::StatusMonitor;
use crate::domain::errors::PipelineError;
use crate::domain::ports::{SourceFactory, SourceId};
use crate::domain::types::Mode;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

const CONTROLLER: &str = "mode_controller";

enum ModeCommand {
    SetMode {
        mode: Mode,
        reply: oneshot::Sender<Result<Mode, PipelineError>>,
    },
    Current(oneshot::Sender<Mode>),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct ModeHandle {
    tx: mpsc::Sender<ModeCommand>,
}

fn stopped<T>(_: T) -> PipelineError {
    PipelineError::connectivity(CONTROLLER, "stopped")
}

impl ModeHandle {
    /// Switch to `mode`. Requests are applied one at a time in arrival order;
    /// asking for the current mode is a no-op.
    pub async fn set_mode(&self, mode: Mode) -> Result<Mode, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ModeCommand::SetMode { mode, reply })
            .await
            .map_err(stopped)?;
        rx.await.map_err(stopped)?
    }

    pub async fn current(&self) -> Result<Mode, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ModeCommand::Current(reply))
            .await
            .map_err(stopped)?;
        rx.await.map_err(stopped)
    }

    pub async fn shutdown(&self) -> Result<(), PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ModeCommand::Shutdown(reply))
            .await
            .map_err(stopped)?;
        rx.await.map_err(stopped)
    }
}

pub struct ModeController {
    mode: Mode,
    active: Vec<SourceId>,
    factory: Arc<dyn SourceFactory>,
    collector: CollectorHandle,
    status: Arc<StatusMonitor>,
}

impl ModeController {
    /// Activate the sources for `initial` and start serving mode requests.
    pub async fn start(
        initial: Mode,
        factory: Arc<dyn SourceFactory>,
        collector: CollectorHandle,
        status: Arc<StatusMonitor>,
    ) -> Result<(ModeHandle, JoinHandle<()>), PipelineError> {
        let sources = factory.sources_for(initial);
        if sources.is_empty() {
            return Err(PipelineError::Configuration(format!(
                "no sources configured for {} mode",
                initial
            )));
        }
        let active = sources.iter().map(|s| s.id()).collect();
        collector
            .replace_sources(Vec::new(), sources)
            .await
            .map_err(|e| PipelineError::connectivity("collector", e))?;
        status.set_mode(initial).await;
        info!("ModeController: started in {} mode", initial);

        let controller = Self {
            mode: initial,
            active,
            factory,
            collector,
            status,
        };
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(controller.run(rx));
        Ok((ModeHandle { tx }, task))
    }

    async fn run(mut self, mut rx: mpsc::Receiver<ModeCommand>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                ModeCommand::SetMode { mode, reply } => {
                    let result = self.switch(mode).await;
                    let _ = reply.send(result);
                }
                ModeCommand::Current(reply) => {
                    let _ = reply.send(self.mode);
                }
                ModeCommand::Shutdown(reply) => {
                    let _ = reply.send(());
                    break;
                }
            }
        }
        info!("ModeController: stopped");
    }

    async fn switch(&mut self, target: Mode) -> Result<Mode, PipelineError> {
        if target == self.mode {
            info!("ModeController: already in {} mode", target);
            return Ok(target);
        }

        let incoming = self.factory.sources_for(target);
        if incoming.is_empty() {
            warn!("ModeController: no sources for {} mode, staying in {}", target, self.mode);
            return Err(PipelineError::Configuration(format!(
                "no sources configured for {} mode",
                target
            )));
        }

        info!(
            "ModeController: switching {} -> {} ({} sources out, {} in)",
            self.mode,
            target,
            self.active.len(),
            incoming.len()
        );
        let next_active = incoming.iter().map(|s| s.id()).collect();
        let outgoing = std::mem::take(&mut self.active);
        self.collector
            .replace_sources(outgoing, incoming)
            .await
            .map_err(|e| PipelineError::connectivity("collector", e))?;

        self.active = next_active;
        self.mode = target;
        self.status.set_mode(target).await;
        Ok(target)
    }
}
