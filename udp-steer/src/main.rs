//! udp-steer: UDP virtual-service steering on raw packet sockets.
//!
//! Watches ingress traffic on one interface, matches Ethernet/IPv4/UDP
//! frames against configured virtual services, and redirects each flow to a
//! deterministically selected upstream with an in-place header rewrite and
//! incremental checksum updates. Anything it cannot steer passes through
//! untouched.

mod config;
mod csum;
mod forward;
mod ingress;
mod metrics;
mod neighbor;
mod packet;
mod pipeline;
mod rewrite;
mod select;
mod table;
#[cfg(test)]
mod testutil;

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{debug, error, info};

use config::Config;
use ingress::{IngressRunner, RawRedirectSink};
use metrics::MetricsState;
use neighbor::StaticNeighborResolver;
use pipeline::Pipeline;
use table::UpstreamTable;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "udp-steer",
    about = "UDP virtual-service load steering with in-place header rewrite",
    version
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing/logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .with_target(false)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "starting udp-steer"
    );

    // Load and validate config
    let config = Config::load(&cli.config).context("loading configuration")?;
    info!(
        interface = %config.interface,
        services = config.services.len(),
        flow_key = ?config.flow_key,
        "configuration loaded"
    );

    // Populate the upstream table
    let table = Arc::new(UpstreamTable::new());
    config.apply(&table).context("populating upstream table")?;
    info!(entries = table.len(), "upstream table populated");

    // Build the data path
    let resolver =
        StaticNeighborResolver::from_config(&config).context("building neighbor table")?;
    let sink = RawRedirectSink::open().context("opening redirect socket")?;
    let pipeline = Arc::new(Pipeline::new(
        table.clone(),
        resolver,
        sink,
        config.flow_key,
    ));
    let stats = pipeline.stats();

    // Start ingress workers
    let runner = IngressRunner::start(&config, pipeline).context("starting ingress")?;

    // Periodic counter heartbeat
    let heartbeat = {
        let stats = stats.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(10));
            tick.tick().await; // immediate first tick
            loop {
                tick.tick().await;
                debug!(
                    total = stats.pkts_total.load(Ordering::Relaxed),
                    redirected = stats.pkts_redirected.load(Ordering::Relaxed),
                    local_delivered = stats.pkts_local_delivered.load(Ordering::Relaxed),
                    passed = stats.pkts_passed.load(Ordering::Relaxed),
                    "pipeline counters"
                );
            }
        })
    };

    // --- Start metrics server ---
    let metrics_handle = if config.metrics.enabled {
        let state = MetricsState {
            interface: config.interface.as_str().into(),
            stats,
        };
        let metrics_config = config.metrics.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = metrics::serve_metrics(&metrics_config, state).await {
                error!(error = %e, "metrics server error");
            }
        }))
    } else {
        None
    };

    // --- Wait for shutdown signal ---
    info!("udp-steer is running. Press Ctrl+C to stop.");

    shutdown_signal().await;

    info!("shutdown signal received, cleaning up...");

    // --- Graceful shutdown ---

    heartbeat.abort();

    if let Some(handle) = metrics_handle {
        handle.abort();
    }

    runner.shutdown();

    info!("udp-steer stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// Signal Handling
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
