//! ncplink - Zigbee network co-processor daemon
//!
//! Serves the co-processor side of a host/NCP link over TCP or a device path.

use ncplink_ncp::metrics::run_metrics_server;
use ncplink_ncp::{Config, LinkMode, Metrics, Ncp};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if NCPLINK_CONFIG is set, then env overrides)
    let config_path = std::env::var("NCPLINK_CONFIG").ok();
    let config = match Config::load() {
        Ok(c) => {
            if let Some(ref path) = config_path {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if config_path.is_some() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::default()
        }
    };

    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {}", e);
        return Err(e.into());
    }

    tracing::info!("Starting ncplink co-processor");
    match config.link.mode {
        LinkMode::Tcp => tracing::info!("  Link: tcp {}", config.link.bind_addr),
        LinkMode::Device => {
            if let Some(ref device) = config.link.device {
                tracing::info!("  Link: device {}", device.display());
            }
            tracing::info!(
                "  Serial: {} baud, {}{}{}",
                config.link.serial.baud_rate,
                config.link.serial.data_bits,
                config.link.serial.parity,
                config.link.serial.stop_bits
            );
        }
    }
    tracing::info!(
        "  Queues: inbound {}, outbound {}, output timeout {}ms",
        config.bus.inbound_capacity,
        config.bus.outbound_capacity,
        config.bus.output_timeout_ms
    );
    tracing::info!(
        "  Network: pan {:#06x}, channel {}, role {}",
        config.network.pan_id,
        config.network.channel,
        config.network.role
    );

    let metrics = if config.metrics.enabled {
        tracing::info!("  Metrics: enabled on {}", config.metrics.bind_addr);
        Some(Arc::new(Metrics::new()?))
    } else {
        tracing::info!("  Metrics: disabled");
        None
    };

    let ncp = Arc::new(Ncp::new(&config, metrics.clone())?);

    let metrics_handle = metrics.map(|metrics| {
        let addr = config.metrics.bind_addr;
        let shutdown = ncp.subscribe_shutdown();
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(addr, metrics, shutdown).await {
                tracing::error!("Metrics server error: {}", e);
            }
        })
    });

    // Spawn shutdown signal handler
    let shutdown_ncp = ncp.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping co-processor...");
        shutdown_ncp.shutdown();
    });

    // Serve (blocks until shutdown, or until the device link closes)
    match config.link.mode {
        LinkMode::Tcp => {
            let listener = TcpListener::bind(config.link.bind_addr).await?;
            ncp.serve_tcp(listener).await?;
        }
        LinkMode::Device => {
            let Some(device) = config.link.device.as_ref() else {
                return Err("link.device is required in device mode".into());
            };
            ncp.serve_device(device).await?;
        }
    }

    ncp.shutdown();
    if let Some(handle) = metrics_handle {
        let _ = handle.await;
    }

    let stats = ncp.stats();
    tracing::info!(
        requests = stats.requests_total.load(std::sync::atomic::Ordering::Relaxed),
        malformed = stats.malformed_total.load(std::sync::atomic::Ordering::Relaxed),
        "Co-processor stopped"
    );
    Ok(())
}
