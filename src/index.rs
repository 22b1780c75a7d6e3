//! Canonicalization and base-index encoding (§4.1).
//!
//! A stride is one octet of an address. Within a stride, a prefix of
//! `b` bits starting at octet value `o` is addressed by a *base index*,
//! the position of that prefix as a node of a complete binary tree (CBT)
//! of depth 8. Index `0` is reserved for "none"; `1` is the stride's own
//! default route; `128..=255` are the stride's `/7` leaves.

use inetnum::addr::Prefix;
use std::net::IpAddr;

/// `(depth_exclusive, bits_in_last_stride)` for a prefix's bit length.
///
/// `/0` gives `(0, 0)`. `/8, /16, /24, /32` give `(1,0), (2,0), (3,0),
/// (4,0)`. `/22` gives `(2, 6)`.
#[inline]
pub fn last_octet_plus_one_and_last_bits(bits: u8) -> (u8, u8) {
    (bits / 8, bits % 8)
}

/// Encode an in-stride prefix `(octet, bits)` as a base index.
///
/// `bits` must be in `0..=7`. `octet`'s low `8 - bits` bits are ignored.
#[inline]
pub fn pfx_to_idx(octet: u8, bits: u8) -> u8 {
    debug_assert!(bits <= 7, "in-stride length out of range: {bits}");
    if bits == 0 {
        1
    } else {
        (1u8 << bits) | (octet >> (8 - bits))
    }
}

/// Inverse of [`pfx_to_idx`]: decode a base index into `(octet, bits)`,
/// where `octet` has its low `8 - bits` bits cleared.
#[inline]
pub fn idx_to_pfx(idx: u8) -> (u8, u8) {
    crate::bitset::idx_to_pfx(idx)
}

/// The base index of the CBT node one gets by treating a full octet `o`
/// as if it were a `/7` within the stride — the entry point for an
/// address's ancestor-chain LPM walk at this stride. A full `/8` host
/// route within a stride is never a base index (it would need a 9th CBT
/// level); it is always represented as a fringe instead (§3 invariant 7).
#[inline]
pub fn host_idx(octet: u8) -> u8 {
    pfx_to_idx(octet, 7)
}

/// A 16-byte buffer of the octets traversed so far, meaningful up to
/// `depth` bytes. IPv4 uses the first 4, IPv6 all 16.
#[derive(Clone, Copy, Debug, Default)]
pub struct StridePath {
    octets: [u8; 16],
    is_ipv4: bool,
}

impl StridePath {
    pub fn new(is_ipv4: bool, octets: &[u8]) -> Self {
        let mut buf = [0u8; 16];
        let n = if is_ipv4 { 4 } else { 16 };
        buf[..n].copy_from_slice(&octets[..n]);
        StridePath { octets: buf, is_ipv4 }
    }

    pub fn from_addr(addr: IpAddr) -> (Self, bool) {
        match addr {
            IpAddr::V4(a) => {
                let mut buf = [0u8; 16];
                buf[..4].copy_from_slice(&a.octets());
                (StridePath { octets: buf, is_ipv4: true }, true)
            }
            IpAddr::V6(a) => (StridePath { octets: a.octets(), is_ipv4: false }, false),
        }
    }

    #[inline]
    pub fn octet(&self, i: usize) -> u8 {
        self.octets[i]
    }

    #[inline]
    pub fn set_octet(&mut self, i: usize, v: u8) {
        self.octets[i] = v;
    }

    #[inline]
    pub fn is_ipv4(&self) -> bool {
        self.is_ipv4
    }

    /// Clear every octet at or after `from`.
    pub fn clear_from(&mut self, from: usize) {
        for b in &mut self.octets[from..] {
            *b = 0;
        }
    }
}

/// The address octets of `pfx`, zero-padded to 16 bytes (IPv4 uses the
/// first 4).
pub fn octets_of(pfx: &Prefix) -> [u8; 16] {
    let mut buf = [0u8; 16];
    match pfx.addr() {
        std::net::IpAddr::V4(a) => buf[..4].copy_from_slice(&a.octets()),
        std::net::IpAddr::V6(a) => buf.copy_from_slice(&a.octets()),
    }
    buf
}

fn prefix_from_octets(octets: &[u8; 16], is_ipv4: bool, bits: u8) -> Prefix {
    if is_ipv4 {
        let addr = std::net::Ipv4Addr::new(
            octets[0], octets[1], octets[2], octets[3],
        );
        Prefix::new_v4_relaxed(addr, bits)
            .expect("bits already bounded to 0..=32 by caller")
    } else {
        let addr = std::net::Ipv6Addr::from(*octets);
        Prefix::new_v6_relaxed(addr, bits)
            .expect("bits already bounded to 0..=128 by caller")
    }
}

/// Reconstruct the canonical prefix represented by `index` at a node
/// reached after consuming `depth` octets along `path`.
pub fn cidr_from_path(
    path: &StridePath,
    depth: u8,
    is_ipv4: bool,
    index: u8,
) -> Prefix {
    let (in_stride_octet, in_stride_bits) = idx_to_pfx(index);
    let mut octets = path.octets;
    octets[depth as usize] = in_stride_octet;
    for b in &mut octets[depth as usize + 1..] {
        *b = 0;
    }
    prefix_from_octets(&octets, is_ipv4, depth * 8 + in_stride_bits)
}

/// Reconstruct the canonical prefix for a fringe at depth `depth` (i.e. the
/// stride-aligned prefix of length `(depth) * 8`, whose final octet is
/// `last_octet`).
pub fn cidr_for_fringe(
    path: &StridePath,
    depth: u8,
    is_ipv4: bool,
    last_octet: u8,
) -> Prefix {
    let mut octets = path.octets;
    octets[depth as usize - 1] = last_octet;
    for b in &mut octets[depth as usize..] {
        *b = 0;
    }
    prefix_from_octets(&octets, is_ipv4, depth * 8)
}

/// Order prefixes first by address, then by length (§4.1).
pub fn cmp_prefix(a: &Prefix, b: &Prefix) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a.is_v4(), b.is_v4()) {
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        _ => {}
    }
    a.addr().cmp(&b.addr()).then(a.len().cmp(&b.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pfx_to_idx_roundtrips() {
        for bits in 0u8..=7 {
            for octet in 0u8..=255 {
                let idx = pfx_to_idx(octet, bits);
                let (back_octet, back_bits) = idx_to_pfx(idx);
                assert_eq!(back_bits, bits);
                let mask = 0xffu8.checked_shl((8 - bits) as u32).unwrap_or(0);
                assert_eq!(back_octet & mask, octet & mask);
            }
        }
    }

    #[test]
    fn base_index_extremes() {
        assert_eq!(pfx_to_idx(0, 0), 1);
        assert_eq!(pfx_to_idx(0b0000_0000, 1), 2);
        assert_eq!(pfx_to_idx(0b1000_0000, 1), 3);
        assert_eq!(pfx_to_idx(0, 7), 128);
        assert_eq!(pfx_to_idx(0b1111_1110, 7), 255);
    }

    #[test]
    fn octet_plus_one_corollaries() {
        assert_eq!(last_octet_plus_one_and_last_bits(0), (0, 0));
        assert_eq!(last_octet_plus_one_and_last_bits(8), (1, 0));
        assert_eq!(last_octet_plus_one_and_last_bits(16), (2, 0));
        assert_eq!(last_octet_plus_one_and_last_bits(24), (3, 0));
        assert_eq!(last_octet_plus_one_and_last_bits(32), (4, 0));
        assert_eq!(last_octet_plus_one_and_last_bits(22), (2, 6));
    }

    #[test]
    fn cmp_prefix_orders_by_address_then_length() {
        let a = Prefix::from_str_roundtrip("10.0.0.0/8");
        let b = Prefix::from_str_roundtrip("10.1.0.0/16");
        let c = Prefix::from_str_roundtrip("11.0.0.0/8");
        assert_eq!(cmp_prefix(&a, &b), std::cmp::Ordering::Less);
        assert_eq!(cmp_prefix(&b, &c), std::cmp::Ordering::Less);
    }

    trait FromStrRoundtrip {
        fn from_str_roundtrip(s: &str) -> Prefix;
    }
    impl FromStrRoundtrip for Prefix {
        fn from_str_roundtrip(s: &str) -> Prefix {
            s.parse().unwrap()
        }
    }
}
