//! Prometheus metrics endpoint.
//!
//! Exposes the data-path counters in Prometheus exposition format via a
//! lightweight HTTP server, plus a /healthz probe.

use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{extract::State, response::IntoResponse, routing::get, Router};
use tracing::info;

use crate::config::MetricsConfig;
use crate::pipeline::PipelineStats;

// ---------------------------------------------------------------------------
// Metrics State
// ---------------------------------------------------------------------------

/// Shared state for the metrics endpoint.
#[derive(Clone)]
pub struct MetricsState {
    /// Interface label attached to every series.
    pub interface: Arc<str>,
    /// Data-path counters, shared with the ingress workers.
    pub stats: Arc<PipelineStats>,
}

// ---------------------------------------------------------------------------
// HTTP Server
// ---------------------------------------------------------------------------

/// Start the Prometheus metrics HTTP server.
pub async fn serve_metrics(config: &MetricsConfig, state: MetricsState) -> Result<()> {
    let app = Router::new()
        .route(&config.path, get(metrics_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("binding metrics server to {}", config.bind))?;

    info!(bind = %config.bind, path = %config.path, "metrics server started");

    axum::serve(listener, app)
        .await
        .context("metrics server error")?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Metrics Handler
// ---------------------------------------------------------------------------

async fn metrics_handler(State(state): State<MetricsState>) -> impl IntoResponse {
    let output = render_metrics(&state.interface, &state.stats);

    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        output,
    )
}

fn render_metrics(interface: &str, stats: &PipelineStats) -> String {
    let counters: [(&str, &str, u64); 8] = [
        (
            "udp_steer_packets_total",
            "Total ingress frames examined",
            stats.pkts_total.load(Relaxed),
        ),
        (
            "udp_steer_packets_passed_total",
            "Frames passed through unmodified",
            stats.pkts_passed.load(Relaxed),
        ),
        (
            "udp_steer_packets_redirected_total",
            "Frames rewritten and redirected to an upstream",
            stats.pkts_redirected.load(Relaxed),
        ),
        (
            "udp_steer_packets_local_delivered_total",
            "Frames restored for local delivery after redirect",
            stats.pkts_local_delivered.load(Relaxed),
        ),
        (
            "udp_steer_packets_malformed_total",
            "Frames that failed header validation",
            stats.pkts_malformed.load(Relaxed),
        ),
        (
            "udp_steer_packets_no_upstream_total",
            "Frames with no matching service or upstream slot",
            stats.pkts_no_upstream.load(Relaxed),
        ),
        (
            "udp_steer_packets_no_route_total",
            "Frames whose upstream next hop did not resolve",
            stats.pkts_no_route.load(Relaxed),
        ),
        (
            "udp_steer_bytes_redirected_total",
            "Total bytes redirected to upstreams",
            stats.bytes_redirected.load(Relaxed),
        ),
    ];

    let mut output = String::with_capacity(2048);
    for (name, help, value) in counters {
        output.push_str(&format!("# HELP {} {}\n", name, help));
        output.push_str(&format!("# TYPE {} counter\n", name));
        output.push_str(&format!(
            "{}{{interface=\"{}\"}} {}\n",
            name, interface, value
        ));
    }
    output
}
