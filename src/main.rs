mod config;
mod game;
mod metrics;
mod net;
mod util;

use std::sync::Arc;

use tracing::{error, info, Level};

use crate::config::ServerConfig;
use crate::metrics::Metrics;
use crate::net::hub::{start_tick_loop, ReplicationHub};
use crate::net::transport::{QuicTransport, ServerEndpoint};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    info!("Emberhold Replication Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = ServerConfig::load_or_default();
    if let Err(e) = config.validate() {
        anyhow::bail!("Invalid configuration: {}", e);
    }
    info!(
        "Configuration loaded: {}:{}, max_sessions={}, R={} H={}",
        config.bind_address,
        config.port,
        config.max_sessions,
        config.visibility_radius,
        config.hysteresis_margin
    );

    // Initialize metrics
    let metrics = Arc::new(Metrics::new());

    // Start metrics server on port 9090 (configurable via METRICS_PORT)
    let metrics_port: u16 = std::env::var("METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(9090);

    let metrics_clone = metrics.clone();
    tokio::spawn(async move {
        if let Err(e) = metrics::start_metrics_server(metrics_clone, metrics_port).await {
            error!("Metrics server error: {}", e);
        }
    });

    // Inbound command queue: connection tasks produce, the tick loop
    // consumes at tick boundaries
    let (command_tx, command_rx) = crossbeam_channel::unbounded();

    // Replication core and its tick loop
    let hub = ReplicationHub::new(config.clone(), QuicTransport::new(), metrics.clone());
    start_tick_loop(hub, command_rx);

    // WebTransport endpoint
    let server = ServerEndpoint::new(config.clone(), command_tx).await?;

    info!(
        "Server ready on https://{}:{}",
        config.bind_address, config.port
    );
    info!("Certificate hash: {}", server.cert_hash());

    // Shutdown signal handler
    let shutdown = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Shutdown signal received");
    };

    // Run server with graceful shutdown
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        _ = shutdown => {
            info!("Shutting down...");
        }
    }

    info!("Server stopped");
    Ok(())
}
