//! Service gateway.
//!
//! A single entry point in front of a fleet of backend services.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────────────────────────┐
//!                        │                 SERVICE GATEWAY                  │
//!                        │                                                  │
//!   Client request       │  ┌─────────┐   ┌────────────┐   ┌─────────────┐  │
//!   ─────────────────────┼─▶│  http   │──▶│ rate_limit │──▶│   routing   │  │
//!                        │  │ server  │   │  (per IP)  │   │  (aliases)  │  │
//!                        │  └─────────┘   └────────────┘   └──────┬──────┘  │
//!                        │                                        ▼         │
//!                        │  ┌──────────┐                  ┌──────────────┐  │
//!                        │  │ registry │◀────────────────▶│load_balancer │  │
//!                        │  │ + probes │                  │ (strategies) │  │
//!                        │  └──────────┘                  └──────┬───────┘  │
//!                        │                                       ▼          │
//!   Client response      │  ┌───────────────────────────────────────────┐  │
//!   ◀────────────────────┼──│ proxy: unary / duplex ws / multiplex ws    │◀─┼── Backend
//!                        │  └───────────────────────────────────────────┘  │
//!                        │                                                  │
//!                        │  config (hot reload) · observability · lifecycle │
//!                        └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use service_gateway::config::{load_config, watcher::ConfigWatcher};
use service_gateway::lifecycle::signals::shutdown_on_signal;
use service_gateway::observability::{logging, metrics};
use service_gateway::{GatewayConfig, HttpServer, Shutdown};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "service-gateway", version, about = "Service gateway with health-aware load balancing")]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "service-gateway starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        services = config.services.len(),
        strategy = %config.balancer.strategy,
        rate_limit_enabled = config.rate_limit.enabled,
        admin_enabled = config.admin.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics endpoint");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // The notify watcher stops when dropped, so it lives until main returns.
    let (_watcher, config_updates) = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            match watcher.run() {
                Ok(handle) => (Some(handle), updates),
                Err(e) => {
                    tracing::warn!(error = %e, "Config hot reload disabled");
                    (None, updates)
                }
            }
        }
        None => {
            let (_tx, rx) = mpsc::unbounded_channel();
            (None, rx)
        }
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    tokio::spawn(shutdown_on_signal(shutdown.clone()));

    let server = HttpServer::new(config);
    server.run(listener, config_updates, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
