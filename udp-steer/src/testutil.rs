//! Frame construction helpers for tests. Checksums are computed from
//! scratch here, so the incremental path in `rewrite` is checked against an
//! independent implementation.

use std::net::Ipv4Addr;

use udp_steer_common::{ETH_HLEN, IP_HLEN, UDP_HLEN};

use crate::csum;
use crate::packet::{IP_CSUM_OFF, UDP_CSUM_OFF};

/// Build a valid Ethernet/IPv4/UDP frame with correct checksums.
pub fn build_udp_frame(
    src: Ipv4Addr,
    src_port: u16,
    dst: Ipv4Addr,
    dst_port: u16,
    payload: &[u8],
) -> Vec<u8> {
    let ip_total = (IP_HLEN + UDP_HLEN + payload.len()) as u16;
    let udp_len = (UDP_HLEN + payload.len()) as u16;

    let mut frame = Vec::with_capacity(ETH_HLEN + ip_total as usize);

    // Ethernet
    frame.extend_from_slice(&[0x02, 0x00, 0x00, 0x00, 0x00, 0xee]); // dst
    frame.extend_from_slice(&[0x02, 0x00, 0x00, 0x00, 0x00, 0xcc]); // src
    frame.extend_from_slice(&0x0800u16.to_be_bytes());

    // IPv4
    frame.push(0x45);
    frame.push(0x00);
    frame.extend_from_slice(&ip_total.to_be_bytes());
    frame.extend_from_slice(&[0x00, 0x00]); // id
    frame.extend_from_slice(&0x4000u16.to_be_bytes()); // DF
    frame.push(64); // ttl
    frame.push(17); // udp
    frame.extend_from_slice(&[0x00, 0x00]); // checksum placeholder
    frame.extend_from_slice(&src.octets());
    frame.extend_from_slice(&dst.octets());

    // UDP
    frame.extend_from_slice(&src_port.to_be_bytes());
    frame.extend_from_slice(&dst_port.to_be_bytes());
    frame.extend_from_slice(&udp_len.to_be_bytes());
    frame.extend_from_slice(&[0x00, 0x00]); // checksum placeholder
    frame.extend_from_slice(payload);

    let (ip_csum, udp_csum) = recompute_checksums(&frame);
    frame[IP_CSUM_OFF..IP_CSUM_OFF + 2].copy_from_slice(&ip_csum.to_be_bytes());
    frame[UDP_CSUM_OFF..UDP_CSUM_OFF + 2].copy_from_slice(&udp_csum.to_be_bytes());

    frame
}

/// From-scratch IPv4 and UDP checksums over the frame's current bytes.
pub fn recompute_checksums(frame: &[u8]) -> (u16, u16) {
    let ip_header = &frame[ETH_HLEN..ETH_HLEN + IP_HLEN];
    let src: [u8; 4] = frame[ETH_HLEN + 12..ETH_HLEN + 16].try_into().unwrap();
    let dst: [u8; 4] = frame[ETH_HLEN + 16..ETH_HLEN + 20].try_into().unwrap();

    let ip_csum = csum::ipv4_header(ip_header);
    let udp_csum = csum::udp(src, dst, &frame[ETH_HLEN + IP_HLEN..]);
    (ip_csum, udp_csum)
}
