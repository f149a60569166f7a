//! ICMP (Internet Control Message Protocol) implementation
//!
//! This module provides ICMP message construction and parsing, answers
//! echo requests and records echo replies for the caller.

use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use parking_lot::Mutex;

use crate::error::{NetError, Result};
use crate::network::checksum;
use crate::network::ip::{Datagram, Disposition, IpLayer};
use crate::network::ipv4::protocol;

/// Minimum ICMP header length in bytes
pub const ICMP_HEADER_LEN: usize = 8;

/// ICMP message types
pub const ICMP_TYPE_ECHO_REPLY: u8 = 0;
pub const ICMP_TYPE_ECHO_REQUEST: u8 = 8;

/// Identifier stamped on messages originated by this stack
pub const DEFAULT_IDENTIFIER: u16 = 0x1234;
const PING_PAYLOAD_LEN: usize = 64;
const PING_PAYLOAD_BYTE: u8 = 0xAA;
/// Echo replies kept for `take_echo_replies` before the oldest is dropped
const MAX_PENDING_REPLIES: usize = 256;

/// ICMP packet header structure
///
/// Represents the standard 8-byte ICMP header as defined in RFC 792
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcmpHeader {
    pub msg_type: u8,  // ICMP message type
    pub msg_code: u8,  // ICMP message code
    pub checksum: u16, // ICMP checksum
    pub identifier: u16,
    pub sequence: u16,
}

impl IcmpHeader {
    pub fn new(msg_type: u8, msg_code: u8, identifier: u16, sequence: u16) -> Self {
        IcmpHeader {
            msg_type,
            msg_code,
            checksum: 0,
            identifier,
            sequence,
        }
    }

    /// Parse ICMP header from byte slice
    ///
    /// Returns None if the data is too short to contain a valid ICMP header
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < ICMP_HEADER_LEN {
            return None;
        }

        Some(IcmpHeader {
            msg_type: data[0],
            msg_code: data[1],
            checksum: BigEndian::read_u16(&data[2..4]),
            identifier: BigEndian::read_u16(&data[4..6]),
            sequence: BigEndian::read_u16(&data[6..8]),
        })
    }

    /// Convert ICMP header to bytes
    pub fn to_bytes(&self) -> [u8; ICMP_HEADER_LEN] {
        let mut bytes = [0u8; ICMP_HEADER_LEN];
        bytes[0] = self.msg_type;
        bytes[1] = self.msg_code;
        BigEndian::write_u16(&mut bytes[2..4], self.checksum);
        BigEndian::write_u16(&mut bytes[4..6], self.identifier);
        BigEndian::write_u16(&mut bytes[6..8], self.sequence);
        bytes
    }

    /// Check if this is an Echo Request message
    pub fn is_echo_request(&self) -> bool {
        self.msg_type == ICMP_TYPE_ECHO_REQUEST
    }

    /// Check if this is an Echo Reply message
    pub fn is_echo_reply(&self) -> bool {
        self.msg_type == ICMP_TYPE_ECHO_REPLY
    }

    /// Serialize header and payload with the checksum computed over both
    pub fn build_message(&self, payload: &[u8]) -> Vec<u8> {
        let mut header = *self;
        header.checksum = 0;
        let mut message = Vec::with_capacity(ICMP_HEADER_LEN + payload.len());
        message.extend_from_slice(&header.to_bytes());
        message.extend_from_slice(payload);
        let sum = checksum(&message);
        BigEndian::write_u16(&mut message[2..4], sum);
        message
    }
}

/// An echo reply that arrived for one of our requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoReply {
    pub from: Ipv4Addr,
    pub identifier: u16,
    pub sequence: u16,
    pub payload_len: usize,
}

pub struct IcmpHandler {
    ip: Arc<IpLayer>,
    replies: Mutex<VecDeque<EchoReply>>,
}

impl IcmpHandler {
    pub fn new(ip: Arc<IpLayer>) -> Self {
        IcmpHandler {
            ip,
            replies: Mutex::new(VecDeque::new()),
        }
    }

    /// Send an ICMP message of the given type and code
    pub fn send(
        &self,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        msg_type: u8,
        msg_code: u8,
        payload: &[u8],
    ) -> Result<Disposition> {
        self.send_with(src, dst, IcmpHeader::new(msg_type, msg_code, DEFAULT_IDENTIFIER, 1), payload)
    }

    /// Send an echo request with a 64-byte 0xAA payload
    pub fn ping(&self, src: Ipv4Addr, dst: Ipv4Addr, sequence: u16) -> Result<Disposition> {
        let payload = [PING_PAYLOAD_BYTE; PING_PAYLOAD_LEN];
        let header = IcmpHeader::new(ICMP_TYPE_ECHO_REQUEST, 0, DEFAULT_IDENTIFIER, sequence);
        let disposition = self.send_with(src, dst, header, &payload)?;
        log::info!("ICMP ping sent: {} -> {}, sequence: {}", src, dst, sequence);
        Ok(disposition)
    }

    fn send_with(&self, src: Ipv4Addr, dst: Ipv4Addr, header: IcmpHeader, payload: &[u8]) -> Result<Disposition> {
        let message = header.build_message(payload);
        log::debug!(
            "ICMP message sent: {} -> {}, type: {}, code: {}",
            src,
            dst,
            header.msg_type,
            header.msg_code
        );
        self.ip.send(src, dst, protocol::ICMP, &message)
    }

    /// Process an inbound ICMP datagram
    ///
    /// Echo requests are answered with an echo reply carrying the same
    /// identifier, sequence and data; echo replies are queued for
    /// [`IcmpHandler::take_echo_replies`].
    pub fn handle(&self, datagram: &Datagram) -> Result<()> {
        let message = &datagram.payload;
        let header = IcmpHeader::from_bytes(message).ok_or(NetError::InvalidArgument)?;
        if checksum(message) != 0 {
            log::debug!("ICMP checksum mismatch from {}", datagram.src);
            return Err(NetError::ChecksumMismatch);
        }

        match header.msg_type {
            ICMP_TYPE_ECHO_REQUEST => {
                log::debug!("Received ICMP Echo Request from {}, replying", datagram.src);
                let reply = IcmpHeader::new(ICMP_TYPE_ECHO_REPLY, 0, header.identifier, header.sequence);
                self.send_with(datagram.dst, datagram.src, reply, &message[ICMP_HEADER_LEN..])?;
            }
            ICMP_TYPE_ECHO_REPLY => {
                let mut replies = self.replies.lock();
                if replies.len() >= MAX_PENDING_REPLIES {
                    replies.pop_front();
                }
                replies.push_back(EchoReply {
                    from: datagram.src,
                    identifier: header.identifier,
                    sequence: header.sequence,
                    payload_len: message.len() - ICMP_HEADER_LEN,
                });
            }
            other => {
                log::debug!("Unsupported ICMP type: {}", other);
            }
        }
        Ok(())
    }

    /// Drain the echo replies received so far
    pub fn take_echo_replies(&self) -> Vec<EchoReply> {
        self.replies.lock().drain(..).collect()
    }
}
