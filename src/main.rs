//! DataJud gateway service.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ query API (/v1) ──▶ orchestrator ──┬──▶ pipeline ──▶ DataJud
//!                                       │           │      │
//!                                       ▼           │      ├─ cache
//!                                  priority queue ──┘      ├─ circuit breakers
//!                                   (workers)              ├─ credential pools
//!                                                          └─ rate limiters
//!     Operator ──▶ admin API ──▶ management service ──▶ state repository
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use datajud_gateway::config::{load_config, GatewayConfig};
use datajud_gateway::http::HttpServer;
use datajud_gateway::lifecycle::signals;
use datajud_gateway::observability::{logging, metrics};
use datajud_gateway::Gateway;

#[derive(Debug, Parser)]
#[command(name = "datajud-gateway", version, about = "Multi-tenant gateway for the DataJud public API")]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };
    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "datajud-gateway starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let gateway = Arc::new(Gateway::builder().build(config.clone()).await?);
    gateway.start().await?;
    let _watcher = match &args.config {
        Some(path) => Some(gateway.watch_config(path)?),
        None => None,
    };

    let shutdown = gateway.shutdown_handle();
    signals::spawn_signal_handler(shutdown.clone());

    let admin = if config.admin.enabled && !config.admin.api_key.trim().is_empty() {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        tracing::info!(address = %listener.local_addr()?, "Admin API listening");
        let router = gateway.admin_router();
        let shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.wait().await })
                .await
        }))
    } else {
        tracing::warn!("Admin API disabled");
        None
    };

    let listener = TcpListener::bind(&config.server.bind_address).await?;
    let server = HttpServer::new(&config.server, Arc::clone(gateway.orchestrator()));
    server.run(listener, shutdown).await?;

    if let Some(admin) = admin {
        match admin.await {
            Ok(Err(e)) => tracing::error!(error = %e, "Admin API server failed"),
            Err(e) => tracing::error!(error = %e, "Admin API task panicked"),
            Ok(Ok(())) => {}
        }
    }

    gateway.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
