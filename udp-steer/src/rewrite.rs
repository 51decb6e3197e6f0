//! In-place frame rewriting toward a new destination endpoint.
//!
//! The rewrite mirrors what the checksums need: every old value is
//! snapshotted before the first byte changes, both checksums are updated
//! incrementally from those snapshots, then the fields are overwritten.
//! Validation happens once, up front; after it passes nothing in here can
//! fail, so a half-mutated frame can never escape.

use std::net::Ipv4Addr;

use crate::csum;
use crate::packet::{
    HeaderView, ParseError, write_u16, write_u32, ETH_DST_OFF, ETH_SRC_OFF, IP_CSUM_OFF,
    IP_DST_OFF, IP_SRC_OFF, UDP_CSUM_OFF, UDP_DST_OFF,
};

/// Ethernet source/destination pair resolved by the route lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacRewrite {
    pub src: [u8; 6],
    pub dst: [u8; 6],
}

/// Rewrite `frame` toward `new_dst:new_dst_port`, in place.
///
/// The source address takes the frame's *old destination* address, so the
/// backend sees traffic originating from the virtual service endpoint.
///
/// `macs` is set on the redirect pass (L2 addresses from the route lookup)
/// and `None` on the local-delivery restore pass.
pub fn rewrite(
    frame: &mut [u8],
    new_dst: Ipv4Addr,
    new_dst_port: u16,
    macs: Option<MacRewrite>,
) -> Result<(), ParseError> {
    // Single validation gate; also the only failure point.
    let view = HeaderView::parse(frame)?;

    // Snapshot all old values up front so no update depends on rewrite
    // order.
    let old_src = u32::from(view.src_addr());
    let old_dst = u32::from(view.dst_addr());
    let old_dst_port = view.dst_port();
    let old_ip_csum = view.ip_checksum();
    let old_udp_csum = view.udp_checksum();

    let new_dst = u32::from(new_dst);

    // UDP checksum covers the pseudo header (both addresses) and the
    // destination port. A stored zero means the sender disabled it (RFC
    // 768); it stays zero.
    if old_udp_csum != 0 {
        let mut udp_csum = csum::replace_u32(old_udp_csum, old_dst, new_dst);
        udp_csum = csum::replace_u32(udp_csum, old_src, old_dst);
        udp_csum = csum::replace_u16(udp_csum, old_dst_port, new_dst_port);
        if udp_csum == 0 {
            udp_csum = 0xffff;
        }
        write_u16(frame, UDP_CSUM_OFF, udp_csum);
    }

    // IPv4 header checksum covers both address fields.
    let mut ip_csum = csum::replace_u32(old_ip_csum, old_dst, new_dst);
    ip_csum = csum::replace_u32(ip_csum, old_src, old_dst);
    write_u16(frame, IP_CSUM_OFF, ip_csum);

    write_u32(frame, IP_SRC_OFF, old_dst);
    write_u32(frame, IP_DST_OFF, new_dst);
    write_u16(frame, UDP_DST_OFF, new_dst_port);

    if let Some(macs) = macs {
        frame[ETH_DST_OFF..ETH_DST_OFF + 6].copy_from_slice(&macs.dst);
        frame[ETH_SRC_OFF..ETH_SRC_OFF + 6].copy_from_slice(&macs.src);
    }

    Ok(())
}
