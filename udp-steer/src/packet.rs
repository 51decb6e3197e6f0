//! Zero-copy, bounds-checked view over a raw Ethernet/IPv4/UDP frame.
//!
//! All header offsets assume the fixed 20-byte IPv4 header. Frames carrying
//! IP options (IHL != 5) are rejected at parse time instead of being
//! mis-parsed; they pass through the stack unmodified like any other
//! non-steerable frame.

use std::fmt;
use std::net::Ipv4Addr;

use udp_steer_common::{ETH_HLEN, ETH_P_IP, IPPROTO_UDP, IP_HLEN, MIN_FRAME_LEN};

// ---------------------------------------------------------------------------
// Header Field Offsets
// ---------------------------------------------------------------------------

pub const ETH_DST_OFF: usize = 0;
pub const ETH_SRC_OFF: usize = 6;
pub const ETH_TYPE_OFF: usize = 12;

pub const IP_VER_IHL_OFF: usize = ETH_HLEN;
pub const IP_PROTO_OFF: usize = ETH_HLEN + 9;
pub const IP_CSUM_OFF: usize = ETH_HLEN + 10;
pub const IP_SRC_OFF: usize = ETH_HLEN + 12;
pub const IP_DST_OFF: usize = ETH_HLEN + 16;

pub const UDP_SRC_OFF: usize = ETH_HLEN + IP_HLEN;
pub const UDP_DST_OFF: usize = ETH_HLEN + IP_HLEN + 2;
pub const UDP_CSUM_OFF: usize = ETH_HLEN + IP_HLEN + 6;

// ---------------------------------------------------------------------------
// Parse Errors
// ---------------------------------------------------------------------------

/// Why a frame is not steerable. Every variant maps to pass-through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// Shorter than Eth + IPv4 + UDP fixed headers.
    Truncated,
    /// EtherType is not IPv4.
    NotIpv4,
    /// IPv4 header carries options (IHL != 5); offsets would be wrong.
    IpOptions,
    /// IP protocol is not UDP.
    NotUdp,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Truncated => write!(f, "frame shorter than eth+ipv4+udp headers"),
            ParseError::NotIpv4 => write!(f, "ethertype is not IPv4"),
            ParseError::IpOptions => write!(f, "IPv4 header carries options"),
            ParseError::NotUdp => write!(f, "IP protocol is not UDP"),
        }
    }
}

impl std::error::Error for ParseError {}

// ---------------------------------------------------------------------------
// HeaderView
// ---------------------------------------------------------------------------

/// Validated accessor over an unmodified frame buffer. No copy, no state:
/// parsing the same bytes twice yields identical fields.
pub struct HeaderView<'a> {
    buf: &'a [u8],
}

impl<'a> HeaderView<'a> {
    /// Validate the frame and return a view, or the reason it is not
    /// steerable. Validation is the single gate in front of any mutation.
    pub fn parse(buf: &'a [u8]) -> Result<Self, ParseError> {
        if buf.len() < MIN_FRAME_LEN {
            return Err(ParseError::Truncated);
        }
        if read_u16(buf, ETH_TYPE_OFF) != ETH_P_IP {
            return Err(ParseError::NotIpv4);
        }
        if buf[IP_VER_IHL_OFF] & 0x0f != 5 {
            return Err(ParseError::IpOptions);
        }
        if buf[IP_PROTO_OFF] != IPPROTO_UDP {
            return Err(ParseError::NotUdp);
        }
        Ok(Self { buf })
    }

    pub fn src_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(read_u32(self.buf, IP_SRC_OFF))
    }

    pub fn dst_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(read_u32(self.buf, IP_DST_OFF))
    }

    pub fn src_port(&self) -> u16 {
        read_u16(self.buf, UDP_SRC_OFF)
    }

    pub fn dst_port(&self) -> u16 {
        read_u16(self.buf, UDP_DST_OFF)
    }

    pub fn ip_checksum(&self) -> u16 {
        read_u16(self.buf, IP_CSUM_OFF)
    }

    pub fn udp_checksum(&self) -> u16 {
        read_u16(self.buf, UDP_CSUM_OFF)
    }
}

/// Big-endian u16 at `off`. Caller guarantees bounds via `parse`.
pub(crate) fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([buf[off], buf[off + 1]])
}

/// Big-endian u32 at `off`. Caller guarantees bounds via `parse`.
pub(crate) fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

pub(crate) fn write_u16(buf: &mut [u8], off: usize, val: u16) {
    buf[off..off + 2].copy_from_slice(&val.to_be_bytes());
}

pub(crate) fn write_u32(buf: &mut [u8], off: usize, val: u32) {
    buf[off..off + 4].copy_from_slice(&val.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::build_udp_frame;

    #[test]
    fn parses_valid_frame() {
        let frame = build_udp_frame(
            Ipv4Addr::new(1, 1, 1, 1),
            40001,
            Ipv4Addr::new(2, 2, 2, 2),
            8125,
            b"stats",
        );
        let view = HeaderView::parse(&frame).unwrap();
        assert_eq!(view.src_addr(), Ipv4Addr::new(1, 1, 1, 1));
        assert_eq!(view.dst_addr(), Ipv4Addr::new(2, 2, 2, 2));
        assert_eq!(view.src_port(), 40001);
        assert_eq!(view.dst_port(), 8125);
    }

    #[test]
    fn reparse_is_idempotent() {
        let frame = build_udp_frame(
            Ipv4Addr::new(10, 1, 2, 3),
            5000,
            Ipv4Addr::new(10, 4, 5, 6),
            6000,
            b"payload",
        );
        let first = HeaderView::parse(&frame).unwrap();
        let fields = (
            first.src_addr(),
            first.dst_addr(),
            first.src_port(),
            first.dst_port(),
            first.ip_checksum(),
            first.udp_checksum(),
        );
        let second = HeaderView::parse(&frame).unwrap();
        assert_eq!(
            fields,
            (
                second.src_addr(),
                second.dst_addr(),
                second.src_port(),
                second.dst_port(),
                second.ip_checksum(),
                second.udp_checksum(),
            )
        );
    }

    #[test]
    fn rejects_short_frame() {
        let frame = [0u8; MIN_FRAME_LEN - 1];
        assert_eq!(HeaderView::parse(&frame).err(), Some(ParseError::Truncated));
        assert_eq!(HeaderView::parse(&[]).err(), Some(ParseError::Truncated));
    }

    #[test]
    fn rejects_non_ipv4_ethertype() {
        let mut frame = build_udp_frame(
            Ipv4Addr::new(1, 1, 1, 1),
            1234,
            Ipv4Addr::new(2, 2, 2, 2),
            5678,
            b"x",
        );
        // 0x86dd = IPv6
        frame[ETH_TYPE_OFF] = 0x86;
        frame[ETH_TYPE_OFF + 1] = 0xdd;
        assert_eq!(HeaderView::parse(&frame).err(), Some(ParseError::NotIpv4));
    }

    #[test]
    fn rejects_non_udp_protocol() {
        let mut frame = build_udp_frame(
            Ipv4Addr::new(1, 1, 1, 1),
            1234,
            Ipv4Addr::new(2, 2, 2, 2),
            5678,
            b"x",
        );
        frame[IP_PROTO_OFF] = 6; // TCP
        assert_eq!(HeaderView::parse(&frame).err(), Some(ParseError::NotUdp));
    }

    #[test]
    fn rejects_ip_options() {
        let mut frame = build_udp_frame(
            Ipv4Addr::new(1, 1, 1, 1),
            1234,
            Ipv4Addr::new(2, 2, 2, 2),
            5678,
            b"x",
        );
        frame[IP_VER_IHL_OFF] = 0x46; // IHL = 6
        assert_eq!(HeaderView::parse(&frame).err(), Some(ParseError::IpOptions));
    }
}
