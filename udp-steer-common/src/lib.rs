//! Wire-format table records shared between the udp-steer data path and any
//! control-plane writer that populates the upstream table.
//!
//! This crate is `no_std` so external writers (including future in-kernel
//! renditions of the data path) can link it. All types are `repr(C, packed)`:
//! the table layout is bit-exact and must stay compatible with every writer
//! (4+2+1 = 7-byte keys, 4+2+1+1 = 8-byte values, no padding).

#![cfg_attr(not(test), no_std)]

use core::fmt;
use core::net::Ipv4Addr;

// ---------------------------------------------------------------------------
// Capacity / Protocol Constants
// ---------------------------------------------------------------------------

/// Upper bound on table entries (master + slave records combined).
pub const MAX_TABLE_ENTRIES: usize = 256;

/// Slot number reserved for the master (count-only) record of a service.
pub const MASTER_SLOT: u8 = 0;

/// Ethernet header size.
pub const ETH_HLEN: usize = 14;

/// IPv4 header size without options. Frames carrying IP options are not
/// steered (see `udp_steer::packet`).
pub const IP_HLEN: usize = 20;

/// UDP header size.
pub const UDP_HLEN: usize = 8;

/// Minimum steerable frame: Eth + IPv4 + UDP headers.
pub const MIN_FRAME_LEN: usize = ETH_HLEN + IP_HLEN + UDP_HLEN;

/// EtherType for IPv4.
pub const ETH_P_IP: u16 = 0x0800;

/// IP protocol number for UDP.
pub const IPPROTO_UDP: u8 = 17;

// ---------------------------------------------------------------------------
// Delivery Policy
// ---------------------------------------------------------------------------

/// Redirect the rewritten clone to the egress interface; nothing else.
pub const DELIVERY_REDIRECT_ONLY: u8 = 0;

/// After the redirect, also hand the frame back to the local stack with its
/// destination restored to the original client-visible endpoint.
pub const DELIVERY_ALSO_LOCAL: u8 = 1;

// ---------------------------------------------------------------------------
// ServiceKey
// ---------------------------------------------------------------------------

/// Lookup key for the upstream table.
///
/// `address` and `port` hold network-byte-order values (the in-memory bytes
/// of the integer fields *are* the wire bytes). Slot 0 addresses the master
/// record of a virtual service; slots 1..=N address its upstream records.
#[repr(C, packed)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ServiceKey {
    /// Virtual-service IPv4 address, network byte order.
    pub address: u32,
    /// Virtual-service UDP port, network byte order.
    pub port: u16,
    /// 0 = master record, 1..=N = upstream slot.
    pub slot: u8,
}

impl ServiceKey {
    /// Encoded size: 4 + 2 + 1 bytes, tightly packed.
    pub const WIRE_LEN: usize = 7;

    /// Key for the master (count) record of a virtual service.
    pub fn master(address: Ipv4Addr, port: u16) -> Self {
        Self::slot(address, port, MASTER_SLOT)
    }

    /// Key for a specific slot of a virtual service.
    pub fn slot(address: Ipv4Addr, port: u16, slot: u8) -> Self {
        Self {
            address: u32::from(address).to_be(),
            port: port.to_be(),
            slot,
        }
    }

    pub fn service_addr(&self) -> Ipv4Addr {
        let address = self.address;
        Ipv4Addr::from(u32::from_be(address))
    }

    pub fn service_port(&self) -> u16 {
        let port = self.port;
        u16::from_be(port)
    }

    /// Wire encoding: exactly the packed in-memory layout.
    pub fn to_bytes(&self) -> [u8; Self::WIRE_LEN] {
        let mut out = [0u8; Self::WIRE_LEN];
        let address = self.address;
        let port = self.port;
        out[0..4].copy_from_slice(&address.to_ne_bytes());
        out[4..6].copy_from_slice(&port.to_ne_bytes());
        out[6] = self.slot;
        out
    }

    pub fn from_bytes(bytes: &[u8; Self::WIRE_LEN]) -> Self {
        Self {
            address: u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            port: u16::from_ne_bytes([bytes[4], bytes[5]]),
            slot: bytes[6],
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}/{}",
            self.service_addr(),
            self.service_port(),
            self.slot
        )
    }
}

// ---------------------------------------------------------------------------
// UpstreamRecord
// ---------------------------------------------------------------------------

/// Value stored in the upstream table.
///
/// Two roles share this shape:
/// - master record (slot 0): only `count` is meaningful, target fields zero;
/// - upstream record (slot 1..=N): `target`/`port` name the backend, `count`
///   is unused.
///
/// `count` and `delivery` are distinct named fields; writers must not reuse
/// one byte position for both meanings.
#[repr(C, packed)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct UpstreamRecord {
    /// Backend IPv4 address, network byte order.
    pub target: u32,
    /// Backend UDP port, network byte order.
    pub port: u16,
    /// Master record: number of upstream slots (1..=N). Upstream record: 0.
    pub count: u8,
    /// `DELIVERY_REDIRECT_ONLY` or `DELIVERY_ALSO_LOCAL`.
    pub delivery: u8,
}

impl UpstreamRecord {
    /// Encoded size: 4 + 2 + 1 + 1 bytes, tightly packed.
    pub const WIRE_LEN: usize = 8;

    /// Master record holding only the upstream count.
    pub fn master(count: u8) -> Self {
        Self {
            target: 0,
            port: 0,
            count,
            delivery: DELIVERY_REDIRECT_ONLY,
        }
    }

    /// Upstream record naming a concrete backend endpoint.
    pub fn upstream(target: Ipv4Addr, port: u16, delivery: u8) -> Self {
        Self {
            target: u32::from(target).to_be(),
            port: port.to_be(),
            count: 0,
            delivery,
        }
    }

    pub fn target_addr(&self) -> Ipv4Addr {
        let target = self.target;
        Ipv4Addr::from(u32::from_be(target))
    }

    pub fn target_port(&self) -> u16 {
        let port = self.port;
        u16::from_be(port)
    }

    pub fn deliver_locally(&self) -> bool {
        self.delivery == DELIVERY_ALSO_LOCAL
    }

    /// Wire encoding: exactly the packed in-memory layout.
    pub fn to_bytes(&self) -> [u8; Self::WIRE_LEN] {
        let mut out = [0u8; Self::WIRE_LEN];
        let target = self.target;
        let port = self.port;
        out[0..4].copy_from_slice(&target.to_ne_bytes());
        out[4..6].copy_from_slice(&port.to_ne_bytes());
        out[6] = self.count;
        out[7] = self.delivery;
        out
    }

    pub fn from_bytes(bytes: &[u8; Self::WIRE_LEN]) -> Self {
        Self {
            target: u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            port: u16::from_ne_bytes([bytes[4], bytes[5]]),
            count: bytes[6],
            delivery: bytes[7],
        }
    }
}

// Packed layout is a wire-compat contract; fail the build if it drifts.
const _: () = assert!(core::mem::size_of::<ServiceKey>() == ServiceKey::WIRE_LEN);
const _: () = assert!(core::mem::size_of::<UpstreamRecord>() == UpstreamRecord::WIRE_LEN);
