//! MarketFlow - exchange tick ingestion, windowed aggregation and storage
//!
//! # Usage
//! ```sh
//! MODE=test cargo run -- --port 8080
//! ```
//!
//! Configuration is read from the environment (and `.env`), see `Config`.

use anyhow::{Context, Result};
use clap::Parser;
use marketflow::application::system::Application;
use marketflow::config::Config;
use marketflow::interfaces::create_router;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{Level, error, info};
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(author, version, about = "Market data ingestion and aggregation pipeline", long_about = None)]
struct Cli {
    /// HTTP port (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load environment variables
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("MarketFlow {} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()
        .context("Failed to load configuration")?
        .with_port_override(cli.port);
    info!(
        "Configuration loaded: Mode={}, Port={}, Window={:?}, Exchanges={:?}",
        config.mode,
        config.port,
        config.pipeline.window,
        config.exchanges.exchange_names()
    );

    let port = config.port;
    let app = Application::build(config).await?;
    let system = app.start().await?;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    let router = create_router(system.pipeline.query.clone());
    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    if let Err(e) = &served {
        error!("HTTP server error: {}", e);
    }

    info!("Shutdown signal received. Draining pipeline...");
    if system.shutdown().await {
        info!("Cleanup complete. Exiting.");
    } else {
        error!("Cleanup incomplete. Exiting.");
    }

    served.context("HTTP server failed")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Unable to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C."),
        _ = terminate => info!("Received SIGTERM."),
    }
}
