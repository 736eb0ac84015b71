//! farm-coordinator entry point.
//!
//! Loads the configuration, wires the supervisor, the device event loop and
//! the HTTP front-end together, and runs until Ctrl-C.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()            -- TOML file or defaults
//!       └─ --write-config      -- save_config() and exit
//!  └─ start services
//!       ├─ ProcessSupervisor   (per-process reader tasks)
//!       ├─ DeviceEventLoop     (Tokio task, sole owner of device state)
//!       └─ HTTP listener       (axum, sends events, reads status)
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use farm_core::{LogTracker, PortAllocator};
use tokio::sync::oneshot;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use farm_coordinator::application::device_loop::{event_queue, DeviceEventLoop};
use farm_coordinator::infrastructure::http::server::{self, HttpState};
use farm_coordinator::infrastructure::process::supervisor::ProcessSupervisor;
use farm_coordinator::infrastructure::storage::config::{load_config, save_config};

/// Device-farm coordinator: starts and stops worker processes as devices
/// come and go.
#[derive(Debug, Parser)]
#[command(name = "farm-coordinator", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, env = "FARM_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides `coordinator.http_port`.
    #[arg(long, env = "FARM_HTTP_PORT")]
    port: Option<u16>,

    /// Writes the effective configuration, defaults included, to this path
    /// and exits.
    #[arg(long, value_name = "PATH")]
    write_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(port) = cli.port {
        config.coordinator.http_port = port;
    }

    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.coordinator.log_level)),
        )
        .init();

    if let Some(path) = cli.write_config.as_deref() {
        save_config(&config, path)
            .with_context(|| format!("failed to write configuration to {}", path.display()))?;
        info!(path = %path.display(), "configuration written");
        return Ok(());
    }

    info!("farm coordinator starting");

    let tracker = Arc::new(LogTracker::new(config.coordinator.log_capacity));
    let (supervisor, exits) = ProcessSupervisor::new(Arc::clone(&tracker), config.supervisor_config());
    let ports = PortAllocator::new(config.port_ranges(), &config.reserved_ports())
        .context("invalid port configuration")?;

    let (event_loop, status) = DeviceEventLoop::new(
        ports,
        config.worker_catalog(),
        Arc::new(supervisor),
        config.loop_config(),
    );
    let (events, event_rx) = event_queue(config.coordinator.event_queue_capacity, config.enqueue_timeout());
    let (loop_stop_tx, loop_stop_rx) = oneshot::channel();
    let loop_task = tokio::spawn(event_loop.run(event_rx, exits, loop_stop_rx));

    // ── HTTP front-end ────────────────────────────────────────────────────────
    let bind_ip: IpAddr = config
        .coordinator
        .bind_address
        .parse()
        .with_context(|| format!("invalid bind_address {:?}", config.coordinator.bind_address))?;
    let addr = SocketAddr::new(bind_ip, config.coordinator.http_port);
    let state = HttpState::new(events, status, tracker, config.coordinator.log_process.clone());
    let (http_stop_tx, http_stop_rx) = oneshot::channel::<()>();
    let http_task = tokio::spawn(async move {
        // A dead listener leaves connected devices running; only new
        // triggers are lost.
        let listener = match server::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("{e}; running without trigger endpoints");
                return;
            }
        };
        let shutdown = async {
            let _ = http_stop_rx.await;
        };
        if let Err(e) = server::serve(listener, state, shutdown).await {
            error!("{e}; running without trigger endpoints");
        }
    });

    info!("farm coordinator ready.  Press Ctrl-C to exit.");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutdown signal received");

    let _ = http_stop_tx.send(());
    let _ = loop_stop_tx.send(());
    if let Err(e) = loop_task.await {
        error!("device event loop task failed: {e}");
    }
    if let Err(e) = http_task.await {
        error!("HTTP task failed: {e}");
    }

    info!("farm coordinator stopped");
    Ok(())
}
