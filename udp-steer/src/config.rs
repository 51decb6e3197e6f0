//! YAML configuration parsing and validation.
//!
//! Defines the virtual services udp-steer intercepts and the upstreams each
//! one steers to, and writes the validated model into the upstream table.
//! At runtime the table is the source of truth; the config file is just its
//! initial population (a remote control plane can take over afterwards).

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use udp_steer_common::{
    UpstreamRecord, DELIVERY_ALSO_LOCAL, DELIVERY_REDIRECT_ONLY, MAX_TABLE_ENTRIES,
};

use crate::select::FlowKeyMode;
use crate::table::UpstreamTable;

// ---------------------------------------------------------------------------
// Top-Level Config
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    /// Network interface the ingress hook attaches to (e.g., "eth0").
    pub interface: String,

    /// Flow-key derivation for upstream selection.
    #[serde(default)]
    pub flow_key: FlowKeyMode,

    /// Virtual services to steer.
    pub services: Vec<ServiceConfig>,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub settings: IngressSettings,
}

// ---------------------------------------------------------------------------
// Service Config
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    /// Client-visible IPv4 address of the virtual service.
    pub address: Ipv4Addr,

    /// Client-visible UDP port.
    pub port: u16,

    /// Backend endpoints, slot order = list order.
    pub upstreams: Vec<UpstreamConfig>,
}

#[derive(Debug, Deserialize)]
pub struct UpstreamConfig {
    /// Backend IPv4 address.
    pub address: Ipv4Addr,

    /// Backend UDP port.
    pub port: u16,

    /// After redirecting, also hand the frame (restored to the original
    /// endpoint) to the local stack.
    #[serde(default)]
    pub deliver_locally: bool,

    /// Next-hop MAC address for this backend ("aa:bb:cc:dd:ee:ff").
    /// Without it, route resolution for the backend fails and its traffic
    /// passes through.
    #[serde(default)]
    pub mac: Option<String>,
}

impl UpstreamConfig {
    pub fn record(&self) -> UpstreamRecord {
        let delivery = if self.deliver_locally {
            DELIVERY_ALSO_LOCAL
        } else {
            DELIVERY_REDIRECT_ONLY
        };
        UpstreamRecord::upstream(self.address, self.port, delivery)
    }
}

// ---------------------------------------------------------------------------
// Ingress Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct IngressSettings {
    /// Maximum frame size read from the wire.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Number of ingress worker threads. 0 = one per CPU core.
    #[serde(default)]
    pub workers: usize,

    /// Pin worker threads to CPU cores.
    #[serde(default = "default_true")]
    pub pin_cpus: bool,

    /// PACKET_FANOUT group id used when `workers > 1`.
    #[serde(default = "default_fanout_group")]
    pub fanout_group: u16,
}

impl Default for IngressSettings {
    fn default() -> Self {
        Self {
            max_frame_size: default_max_frame_size(),
            workers: 0,
            pin_cpus: true,
            fanout_group: default_fanout_group(),
        }
    }
}

fn default_max_frame_size() -> usize {
    2048
}
fn default_true() -> bool {
    true
}
fn default_fanout_group() -> u16 {
    0x5553 // "US"
}

// ---------------------------------------------------------------------------
// Metrics Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_bind")]
    pub bind: SocketAddr,

    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: default_metrics_bind(),
            path: default_metrics_path(),
        }
    }
}

fn default_metrics_bind() -> SocketAddr {
    "0.0.0.0:9090".parse().unwrap()
}
fn default_metrics_path() -> String {
    "/metrics".to_string()
}

// ---------------------------------------------------------------------------
// Loading & Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Load config from a YAML file path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;

        let config: Config =
            serde_yaml::from_str(&contents).with_context(|| "parsing YAML config")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration consistency.
    fn validate(&self) -> Result<()> {
        if self.interface.trim().is_empty() {
            bail!("'interface' must not be empty");
        }
        if self.services.is_empty() {
            bail!("at least one service is required");
        }

        let mut seen = std::collections::HashSet::new();
        let mut total_entries = 0usize;

        for (i, service) in self.services.iter().enumerate() {
            let ctx = format!("service[{}] {}:{}", i, service.address, service.port);

            if service.port == 0 {
                bail!("{}: port must be 1..65535", ctx);
            }
            if !seen.insert((service.address, service.port)) {
                bail!("{}: duplicate service endpoint", ctx);
            }
            if service.upstreams.is_empty() {
                bail!("{}: at least one upstream is required", ctx);
            }
            if service.upstreams.len() > u8::MAX as usize {
                bail!(
                    "{}: {} upstreams exceeds the per-service limit ({})",
                    ctx,
                    service.upstreams.len(),
                    u8::MAX
                );
            }

            for (j, upstream) in service.upstreams.iter().enumerate() {
                if upstream.port == 0 {
                    bail!("{}: upstream[{}] port must be 1..65535", ctx, j);
                }
                if let Some(ref mac) = upstream.mac {
                    parse_mac(mac)
                        .with_context(|| format!("{}: upstream[{}] invalid MAC", ctx, j))?;
                }
            }

            // One master record plus one record per upstream slot.
            total_entries += 1 + service.upstreams.len();
        }

        if total_entries > MAX_TABLE_ENTRIES {
            bail!(
                "configuration needs {} table entries, capacity is {}",
                total_entries,
                MAX_TABLE_ENTRIES
            );
        }

        Ok(())
    }

    /// Write all service records into the upstream table.
    pub fn apply(&self, table: &UpstreamTable) -> Result<()> {
        for service in &self.services {
            let records: Vec<UpstreamRecord> =
                service.upstreams.iter().map(|u| u.record()).collect();
            table
                .replace_service(service.address, service.port, &records)
                .with_context(|| {
                    format!("populating table for {}:{}", service.address, service.port)
                })?;
        }
        Ok(())
    }
}

/// Parse a MAC address string "aa:bb:cc:dd:ee:ff" into 6 bytes.
pub fn parse_mac(s: &str) -> Result<[u8; 6]> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 6 {
        bail!("MAC address must have 6 octets, got '{}'", s);
    }
    let mut mac = [0u8; 6];
    for (i, part) in parts.iter().enumerate() {
        mac[i] = u8::from_str_radix(part, 16)
            .with_context(|| format!("invalid MAC octet '{}' in '{}'", part, s))?;
    }
    Ok(mac)
}
