//! Internet checksum arithmetic.
//!
//! Incremental updates follow RFC 1624: `HC' = ~(~HC + ~m + m')`, applied
//! 16 bits at a time. The from-scratch computations exist as the reference
//! the incremental path must agree with (and for building test frames).

/// Fold carries until the sum fits in 16 bits.
fn fold(mut sum: u32) -> u16 {
    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    sum as u16
}

/// Incremental checksum update for a changed 16-bit field (RFC 1624).
pub fn replace_u16(check: u16, old: u16, new: u16) -> u16 {
    let sum = (!check as u32) + (!old as u32) + new as u32;
    !fold(sum)
}

/// Incremental checksum update for a changed 32-bit field, treated as two
/// independent 16-bit replacements.
pub fn replace_u32(check: u16, old: u32, new: u32) -> u16 {
    let sum = (!check as u32)
        + (!((old >> 16) as u16) as u32)
        + (!(old as u16) as u32)
        + ((new >> 16) & 0xffff)
        + (new & 0xffff);
    !fold(sum)
}

/// One's-complement sum of big-endian 16-bit words; odd trailing byte is
/// padded with zero.
#[cfg(test)]
fn sum_words(bytes: &[u8]) -> u32 {
    let mut sum = 0u32;
    let mut chunks = bytes.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }
    sum
}

/// IPv4 header checksum computed from scratch. `header` is the 20-byte
/// header with the checksum field bytes present (their value is ignored).
#[cfg(test)]
pub fn ipv4_header(header: &[u8]) -> u16 {
    let mut sum = sum_words(&header[..10]);
    sum += sum_words(&header[12..]);
    !fold(sum)
}

/// UDP checksum computed from scratch over the IPv4 pseudo header, the UDP
/// header (checksum field ignored), and the payload. A computed value of
/// zero is emitted as 0xffff (RFC 768: zero means "no checksum").
#[cfg(test)]
pub fn udp(src: [u8; 4], dst: [u8; 4], udp_segment: &[u8]) -> u16 {
    let mut sum = sum_words(&src);
    sum += sum_words(&dst);
    sum += 17; // protocol
    sum += udp_segment.len() as u32;

    // UDP header with the checksum field skipped, then payload.
    sum += sum_words(&udp_segment[..6]);
    sum += sum_words(&udp_segment[8..]);

    match !fold(sum) {
        0 => 0xffff,
        c => c,
    }
}

/// Verify a checksum-bearing region: summing all words including the stored
/// checksum must fold to 0xffff.
#[cfg(test)]
pub fn verifies(bytes: &[u8], extra: u32) -> bool {
    fold(sum_words(bytes) + extra) == 0xffff
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 1071 worked example: words 0x0001 0xf203 0xf4f5 0xf6f7.
    #[test]
    fn from_scratch_matches_rfc1071_example() {
        let bytes = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(fold(sum_words(&bytes)), 0xddf2);
    }

    #[test]
    fn replace_u16_matches_recompute() {
        let mut words: Vec<u8> = vec![0x45, 0x00, 0x1f, 0xbd, 0xab, 0xcd, 0x00, 0x00];
        let check = !fold(sum_words(&words));

        // Replace word 1 (0x1fbd -> 0x2328) and recompute both ways.
        let updated = replace_u16(check, 0x1fbd, 0x2328);
        words[2] = 0x23;
        words[3] = 0x28;
        let scratch = !fold(sum_words(&words));
        assert_eq!(updated, scratch);
    }

    #[test]
    fn replace_u32_matches_two_u16_replacements() {
        let check = 0x1c46u16;
        let old = 0xc0a8_0001u32;
        let new = 0x0808_0808u32;

        let via_u32 = replace_u32(check, old, new);
        let via_u16 = replace_u16(
            replace_u16(check, (old >> 16) as u16, (new >> 16) as u16),
            old as u16,
            new as u16,
        );
        assert_eq!(via_u32, via_u16);
    }

    #[test]
    fn replacement_order_is_irrelevant() {
        let check = 0x9a3fu16;
        let a = replace_u32(replace_u16(check, 10, 99), 0x0101_0101, 0x0202_0202);
        let b = replace_u16(replace_u32(check, 0x0101_0101, 0x0202_0202), 10, 99);
        assert_eq!(a, b);
    }

    #[test]
    fn udp_never_computes_zero() {
        // Zero on the wire means "checksum disabled", so a computed zero
        // must transmit as 0xffff.
        let seg = [0x00, 0x00, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00];
        let c = udp([0, 0, 0, 0], [0, 0, 0, 0], &seg);
        assert_ne!(c, 0);
    }
}
