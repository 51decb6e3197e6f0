//! Static neighbor-table route resolution.
//!
//! The kernel will not resolve next hops for frames we emit on a raw
//! socket, so the egress L2 addresses come from configuration: each
//! upstream may carry the MAC of its next hop, and the interface's own MAC
//! is read from sysfs. Backends without a neighbor entry simply never
//! resolve, which the pipeline turns into pass-through.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::{parse_mac, Config};
use crate::forward::{Route, RouteResolver};

pub struct StaticNeighborResolver {
    ifindex: u32,
    src_mac: [u8; 6],
    neighbors: HashMap<Ipv4Addr, [u8; 6]>,
}

impl StaticNeighborResolver {
    /// Build the resolver for the configured interface and upstream set.
    pub fn from_config(config: &Config) -> Result<Self> {
        let ifindex = interface_index(&config.interface)?;
        let src_mac = interface_mac(&config.interface)?;

        let mut neighbors = HashMap::new();
        for service in &config.services {
            for upstream in &service.upstreams {
                match &upstream.mac {
                    Some(mac) => {
                        // Validated at config load; parse again for the bytes.
                        let mac = parse_mac(mac)?;
                        neighbors.insert(upstream.address, mac);
                    }
                    None => warn!(
                        upstream = %upstream.address,
                        "no neighbor MAC configured; traffic for this upstream will pass through"
                    ),
                }
            }
        }

        info!(
            interface = %config.interface,
            ifindex,
            neighbors = neighbors.len(),
            "static neighbor table ready"
        );

        Ok(Self {
            ifindex,
            src_mac,
            neighbors,
        })
    }

    #[cfg(test)]
    pub fn for_tests(
        ifindex: u32,
        src_mac: [u8; 6],
        neighbors: HashMap<Ipv4Addr, [u8; 6]>,
    ) -> Self {
        Self {
            ifindex,
            src_mac,
            neighbors,
        }
    }
}

impl RouteResolver for StaticNeighborResolver {
    fn resolve(&self, dst: Ipv4Addr) -> Option<Route> {
        self.neighbors.get(&dst).map(|dst_mac| Route {
            ifindex: self.ifindex,
            src_mac: self.src_mac,
            dst_mac: *dst_mac,
        })
    }
}

/// Get the interface index for a network interface name.
pub fn interface_index(iface: &str) -> Result<u32> {
    let idx = nix::net::if_::if_nametoindex(iface)
        .with_context(|| format!("interface '{}' not found", iface))?;
    Ok(idx)
}

/// Read the interface's own MAC address from sysfs.
fn interface_mac(iface: &str) -> Result<[u8; 6]> {
    let path = Path::new("/sys/class/net").join(iface).join("address");
    let addr = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    parse_mac(addr.trim()).with_context(|| format!("MAC address of '{}'", iface))
}
