//! Network layer protocols implementation
//!
//! This module contains the network layer of the stack:
//! - IPv4: header codec and the IP layer that sends and receives packets
//! - ICMP: echo request/reply
//! - Routing, NAT and firewall tables consulted by the IP layer

pub mod firewall;
pub mod icmp;
pub mod ip;
pub mod ipv4;
pub mod nat;
pub mod route;

use std::net::Ipv4Addr;

// Re-export commonly used items
pub use icmp::{IcmpHeader, ICMP_TYPE_ECHO_REPLY, ICMP_TYPE_ECHO_REQUEST};
pub use ipv4::{flags, protocol, Ipv4Header};

/// Calculate Internet checksum
///
/// Algorithm: Sum data in 16-bit chunks, add carry bits to the sum,
/// and return the one's complement of the result.
/// This is used for IP, ICMP, UDP and TCP checksums.
pub fn checksum(data: &[u8]) -> u16 {
    !fold(sum_words(0, data)) as u16
}

/// Checksum of a TCP or UDP segment including the IPv4 pseudo header
///
/// The checksum field inside `segment` must already be zero when computing,
/// or hold the transmitted value when verifying (the result is then zero).
pub fn transport_checksum(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, segment: &[u8]) -> u16 {
    let mut pseudo = [0u8; 12];
    pseudo[0..4].copy_from_slice(&src.octets());
    pseudo[4..8].copy_from_slice(&dst.octets());
    pseudo[9] = protocol;
    pseudo[10..12].copy_from_slice(&(segment.len() as u16).to_be_bytes());

    let sum = sum_words(0, &pseudo);
    !fold(sum_words(sum, segment)) as u16
}

/// Incrementally update a checksum after 16-bit words changed (RFC 1624)
///
/// `old_words` and `new_words` are the covered words before and after the
/// rewrite. Unlike a full recompute this keeps a corrupted checksum corrupted.
pub fn checksum_adjust(old_checksum: u16, old_words: &[u16], new_words: &[u16]) -> u16 {
    let mut sum = (!old_checksum) as u32;
    for &word in old_words {
        sum = fold(sum + (!word) as u32);
    }
    for &word in new_words {
        sum = fold(sum + word as u32);
    }
    !fold(sum) as u16
}

fn sum_words(mut sum: u32, data: &[u8]) -> u32 {
    // Process data in 2-byte chunks
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum = fold(sum + u16::from_be_bytes([chunk[0], chunk[1]]) as u32);
    }

    // Handle odd-length data by padding with zero
    if let Some(&last_byte) = chunks.remainder().first() {
        sum = fold(sum + ((last_byte as u32) << 8));
    }
    sum
}

fn fold(mut sum: u32) -> u32 {
    while (sum >> 16) > 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    sum
}
