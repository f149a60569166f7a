//! TCP (Transmission Control Protocol) wire format and states
//!
//! This module provides TCP header parsing and serialization, segment
//! checksumming, the RFC 793 connection states and wraparound-safe
//! sequence number comparison. The state machine itself lives in
//! [`crate::transport::engine`].

use std::net::Ipv4Addr;

use byteorder::{BigEndian, ByteOrder};

use crate::error::{NetError, Result};
use crate::network::ip::Datagram;
use crate::network::ipv4::protocol;
use crate::network::transport_checksum;

pub const TCP_HEADER_LEN: usize = 20;

/// TCP flag bits (second byte of the data-offset/flags word)
pub mod flags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const PSH: u8 = 0x08;
    pub const ACK: u8 = 0x10;
    pub const URG: u8 = 0x20;
    pub const ECE: u8 = 0x40;
    pub const CWR: u8 = 0x80;
}

/// TCP connection states as defined in RFC 793
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TcpState {
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

impl TcpState {
    /// States in which both sides' initial sequence numbers are known
    pub fn is_synchronized(&self) -> bool {
        !matches!(self, TcpState::Closed | TcpState::Listen | TcpState::SynSent)
    }
}

/// TCP packet header structure
///
/// Represents the standard 20-byte TCP header as defined in RFC 793
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq_number: u32,
    pub ack_number: u32,
    pub data_offset: u8, // Header length in 32-bit words (high nibble on the wire)
    pub flags: u8,
    pub window_size: u16,
    pub checksum: u16,
    pub urgent_ptr: u16,
}

impl TcpHeader {
    pub fn new(src_port: u16, dst_port: u16, seq_number: u32, ack_number: u32, flags: u8, window_size: u16) -> Self {
        TcpHeader {
            src_port,
            dst_port,
            seq_number,
            ack_number,
            data_offset: (TCP_HEADER_LEN / 4) as u8,
            flags,
            window_size,
            checksum: 0,
            urgent_ptr: 0,
        }
    }

    /// Parse TCP header from byte slice
    ///
    /// Returns None if the data is too short to contain a valid TCP header
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < TCP_HEADER_LEN {
            return None;
        }

        Some(TcpHeader {
            src_port: BigEndian::read_u16(&data[0..2]),
            dst_port: BigEndian::read_u16(&data[2..4]),
            seq_number: BigEndian::read_u32(&data[4..8]),
            ack_number: BigEndian::read_u32(&data[8..12]),
            data_offset: data[12] >> 4,
            flags: data[13],
            window_size: BigEndian::read_u16(&data[14..16]),
            checksum: BigEndian::read_u16(&data[16..18]),
            urgent_ptr: BigEndian::read_u16(&data[18..20]),
        })
    }

    /// Convert TCP header to bytes
    pub fn to_bytes(&self) -> [u8; TCP_HEADER_LEN] {
        let mut bytes = [0u8; TCP_HEADER_LEN];
        BigEndian::write_u16(&mut bytes[0..2], self.src_port);
        BigEndian::write_u16(&mut bytes[2..4], self.dst_port);
        BigEndian::write_u32(&mut bytes[4..8], self.seq_number);
        BigEndian::write_u32(&mut bytes[8..12], self.ack_number);
        bytes[12] = self.data_offset << 4;
        bytes[13] = self.flags;
        BigEndian::write_u16(&mut bytes[14..16], self.window_size);
        BigEndian::write_u16(&mut bytes[16..18], self.checksum);
        BigEndian::write_u16(&mut bytes[18..20], self.urgent_ptr);
        bytes
    }

    fn has(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    /// Check if SYN flag is set
    pub fn is_syn(&self) -> bool {
        self.has(flags::SYN)
    }

    /// Check if ACK flag is set
    pub fn is_ack(&self) -> bool {
        self.has(flags::ACK)
    }

    /// Check if FIN flag is set
    pub fn is_fin(&self) -> bool {
        self.has(flags::FIN)
    }

    /// Check if RST flag is set
    pub fn is_rst(&self) -> bool {
        self.has(flags::RST)
    }

    /// Check if PSH flag is set
    pub fn is_psh(&self) -> bool {
        self.has(flags::PSH)
    }

    /// Check if URG flag is set
    pub fn is_urg(&self) -> bool {
        self.has(flags::URG)
    }

    /// Get the data offset (header length) in bytes
    pub fn header_len(&self) -> usize {
        (self.data_offset as usize) * 4
    }
}

/// A TCP segment with the addresses of the IP packet that carried it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpSegment {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub header: TcpHeader,
    pub payload: Vec<u8>,
}

impl TcpSegment {
    pub fn new(src: Ipv4Addr, dst: Ipv4Addr, header: TcpHeader, payload: Vec<u8>) -> Self {
        TcpSegment {
            src,
            dst,
            header,
            payload,
        }
    }

    /// Decode and checksum-verify the TCP segment inside `datagram`
    ///
    /// Options are skipped using the data offset.
    pub fn parse(datagram: &Datagram) -> Result<Self> {
        let data = &datagram.payload;
        let header = TcpHeader::from_bytes(data).ok_or(NetError::InvalidArgument)?;
        let header_len = header.header_len();
        if header_len < TCP_HEADER_LEN || header_len > data.len() {
            return Err(NetError::InvalidArgument);
        }
        if transport_checksum(datagram.src, datagram.dst, protocol::TCP, data) != 0 {
            return Err(NetError::ChecksumMismatch);
        }
        Ok(TcpSegment {
            src: datagram.src,
            dst: datagram.dst,
            header,
            payload: data[header_len..].to_vec(),
        })
    }

    /// Serialize header and payload with the pseudo-header checksum filled in
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut header = self.header;
        header.data_offset = (TCP_HEADER_LEN / 4) as u8;
        header.checksum = 0;
        let mut bytes = Vec::with_capacity(TCP_HEADER_LEN + self.payload.len());
        bytes.extend_from_slice(&header.to_bytes());
        bytes.extend_from_slice(&self.payload);
        let sum = transport_checksum(self.src, self.dst, protocol::TCP, &bytes);
        BigEndian::write_u16(&mut bytes[16..18], sum);
        bytes
    }

    /// Sequence space consumed: payload bytes plus one each for SYN and FIN
    pub fn seq_len(&self) -> u32 {
        self.payload.len() as u32 + self.header.is_syn() as u32 + self.header.is_fin() as u32
    }
}

/// Check if sequence number a is less than b (with wraparound)
#[inline]
pub fn seq_lt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

/// Check if sequence number a is less than or equal to b (with wraparound)
#[inline]
pub fn seq_le(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) <= 0
}

/// Check if sequence number a is greater than b (with wraparound)
#[inline]
pub fn seq_gt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

/// Check if sequence number a is greater than or equal to b (with wraparound)
#[inline]
pub fn seq_ge(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) >= 0
}

/// Check if `seq` lies in the window [left, left + size)
#[inline]
pub fn seq_in_window(seq: u32, left: u32, size: u32) -> bool {
    size > 0 && seq.wrapping_sub(left) < size
}
