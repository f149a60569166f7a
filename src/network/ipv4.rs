//! IPv4 header codec
//!
//! This module provides IPv4 header parsing, serialization and checksum
//! handling. Options are never emitted; on parse they are accounted for by
//! the IHL field and skipped by the caller.

use std::net::Ipv4Addr;

use crate::error::{NetError, Result};
use crate::network::checksum;
use byteorder::{BigEndian, ByteOrder};

pub const IPV4_HEADER_LEN: usize = 20;
const IPV4_VERSION: u8 = 4;
const DEFAULT_IHL: u8 = 5; // 5 * 4 = 20 bytes (standard header length)
pub const DEFAULT_TTL: u8 = 64;
/// Largest payload that fits the 16-bit total length field
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize - IPV4_HEADER_LEN;

/// IPv4 packet header structure
///
/// Represents the standard 20-byte IPv4 header as defined in RFC 791
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Header {
    pub version: u8,
    pub ihl: u8, // Internet Header Length
    pub tos: u8, // Type of Service
    pub total_len: u16,
    pub id: u16,
    pub flags_frag_offset: u16, // Flags and Fragment Offset
    pub ttl: u8,                // Time to Live
    pub protocol: u8,           // Next Protocol
    pub checksum: u16,
    pub src_addr: Ipv4Addr,
    pub dst_addr: Ipv4Addr,
}

impl Ipv4Header {
    /// Create a header for a payload of `payload_len` bytes
    ///
    /// `version_ihl` is 0x45, TOS and fragmentation fields are zero and the
    /// checksum is left at zero until [`Ipv4Header::update_checksum`].
    pub fn new(
        protocol: u8,
        src_addr: Ipv4Addr,
        dst_addr: Ipv4Addr,
        payload_len: u16,
        id: u16,
        ttl: u8,
    ) -> Self {
        Ipv4Header {
            version: IPV4_VERSION,
            ihl: DEFAULT_IHL,
            tos: 0,
            total_len: IPV4_HEADER_LEN as u16 + payload_len,
            id,
            flags_frag_offset: 0,
            ttl,
            protocol,
            checksum: 0,
            src_addr,
            dst_addr,
        }
    }

    /// Parse IPv4 header from byte slice
    ///
    /// Returns None if the data is too short or if the version field is not 4
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < IPV4_HEADER_LEN {
            return None;
        }

        let version = (data[0] & 0xF0) >> 4;
        if version != IPV4_VERSION {
            return None;
        }

        Some(Ipv4Header {
            version,
            ihl: data[0] & 0x0F,
            tos: data[1],
            total_len: BigEndian::read_u16(&data[2..4]),
            id: BigEndian::read_u16(&data[4..6]),
            flags_frag_offset: BigEndian::read_u16(&data[6..8]),
            ttl: data[8],
            protocol: data[9],
            checksum: BigEndian::read_u16(&data[10..12]),
            src_addr: Ipv4Addr::new(data[12], data[13], data[14], data[15]),
            dst_addr: Ipv4Addr::new(data[16], data[17], data[18], data[19]),
        })
    }

    /// Convert IPv4 header to bytes
    ///
    /// Serializes the header to a 20-byte array ready for transmission
    pub fn to_bytes(&self) -> [u8; IPV4_HEADER_LEN] {
        let mut bytes = [0u8; IPV4_HEADER_LEN];
        bytes[0] = (self.version << 4) | self.ihl;
        bytes[1] = self.tos;
        BigEndian::write_u16(&mut bytes[2..4], self.total_len);
        BigEndian::write_u16(&mut bytes[4..6], self.id);
        BigEndian::write_u16(&mut bytes[6..8], self.flags_frag_offset);
        bytes[8] = self.ttl;
        bytes[9] = self.protocol;
        BigEndian::write_u16(&mut bytes[10..12], self.checksum);
        bytes[12..16].copy_from_slice(&self.src_addr.octets());
        bytes[16..20].copy_from_slice(&self.dst_addr.octets());
        bytes
    }

    /// Checksum of this header with the checksum field treated as zero
    pub fn calculate_checksum(&self) -> u16 {
        let mut bytes = self.to_bytes();
        bytes[10] = 0;
        bytes[11] = 0;
        checksum(&bytes)
    }

    /// Recalculate and store the checksum field
    pub fn update_checksum(&mut self) {
        self.checksum = self.calculate_checksum();
    }

    /// Get the header length in bytes
    pub fn header_len(&self) -> usize {
        (self.ihl as usize) * 4
    }

    /// Get payload length
    ///
    /// Returns the length of the payload (total length - header length)
    pub fn payload_len(&self) -> usize {
        (self.total_len as usize).saturating_sub(self.header_len())
    }

    /// Serialize header and payload into one packet, fixing length and checksum
    pub fn build_packet(&self, payload: &[u8]) -> Vec<u8> {
        let mut header = self.clone();
        header.total_len = (IPV4_HEADER_LEN + payload.len()) as u16;
        header.update_checksum();
        let mut packet = Vec::with_capacity(header.total_len as usize);
        packet.extend_from_slice(&header.to_bytes());
        packet.extend_from_slice(payload);
        packet
    }
}

/// Structural validation of a received packet
impl Ipv4Header {
    /// Check version, IHL and total length against the received buffer
    ///
    /// Checksum verification is separate so the IP layer can count it apart
    /// from malformed packets.
    pub fn validate(&self, packet_len: usize) -> Result<()> {
        if self.version != IPV4_VERSION {
            return Err(NetError::InvalidArgument);
        }

        // IHL minimum 5 for a 20-byte header
        let header_len = self.header_len();
        if self.ihl < DEFAULT_IHL || header_len > packet_len {
            return Err(NetError::InvalidArgument);
        }

        let total_len = self.total_len as usize;
        if total_len < header_len || total_len > packet_len {
            return Err(NetError::InvalidArgument);
        }

        Ok(())
    }
}

/// Verify the checksum of the raw header at the start of `packet`
///
/// The stored checksum is compared with one recomputed over the header bytes
/// with the checksum field zeroed.
pub fn verify_checksum(packet: &[u8], header_len: usize) -> bool {
    if packet.len() < header_len || header_len < IPV4_HEADER_LEN {
        return false;
    }
    let stored = BigEndian::read_u16(&packet[10..12]);
    let mut header_bytes = packet[..header_len].to_vec();
    header_bytes[10] = 0; // Clear checksum field
    header_bytes[11] = 0;
    checksum(&header_bytes) == stored
}

/// IPv4 protocol constants
pub mod protocol {
    pub const ICMP: u8 = 1;
    pub const TCP: u8 = 6;
    pub const UDP: u8 = 17;
}

/// IPv4 flags constants
pub mod flags {
    pub const DONT_FRAGMENT: u16 = 0x4000;
    pub const MORE_FRAGMENTS: u16 = 0x2000;
    pub const FRAGMENT_OFFSET_MASK: u16 = 0x1FFF;
}
