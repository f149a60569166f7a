//! UDP (User Datagram Protocol) implementation
//!
//! This module provides UDP header parsing, checksumming and a port
//! table of bounded receive queues.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddrV4;
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use parking_lot::Mutex;

use crate::error::{NetError, Result};
use crate::network::ip::{Datagram, Disposition, IpLayer};
use crate::network::ipv4::{protocol, MAX_PAYLOAD_LEN};
use crate::network::transport_checksum;

/// UDP header length in bytes
pub const UDP_HEADER_LEN: usize = 8;

/// UDP packet header structure
///
/// Represents the standard 8-byte UDP header as defined in RFC 768
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub length: u16, // Length of UDP header and data
    pub checksum: u16,
}

impl UdpHeader {
    /// Parse UDP header from byte slice
    ///
    /// Returns None if the data is too short to contain a valid UDP header
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < UDP_HEADER_LEN {
            return None;
        }

        Some(UdpHeader {
            src_port: BigEndian::read_u16(&data[0..2]),
            dst_port: BigEndian::read_u16(&data[2..4]),
            length: BigEndian::read_u16(&data[4..6]),
            checksum: BigEndian::read_u16(&data[6..8]),
        })
    }

    /// Convert UDP header to bytes
    pub fn to_bytes(&self) -> [u8; UDP_HEADER_LEN] {
        let mut bytes = [0u8; UDP_HEADER_LEN];
        BigEndian::write_u16(&mut bytes[0..2], self.src_port);
        BigEndian::write_u16(&mut bytes[2..4], self.dst_port);
        BigEndian::write_u16(&mut bytes[4..6], self.length);
        BigEndian::write_u16(&mut bytes[6..8], self.checksum);
        bytes
    }
}

/// Creates a complete UDP segment with the pseudo-header checksum set
pub fn build_segment(src: SocketAddrV4, dst: SocketAddrV4, payload: &[u8]) -> Vec<u8> {
    let header = UdpHeader {
        src_port: src.port(),
        dst_port: dst.port(),
        length: (UDP_HEADER_LEN + payload.len()) as u16,
        checksum: 0,
    };

    let mut segment = Vec::with_capacity(UDP_HEADER_LEN + payload.len());
    segment.extend_from_slice(&header.to_bytes());
    segment.extend_from_slice(payload);

    // A computed zero is sent as all ones; zero means "no checksum"
    let sum = match transport_checksum(*src.ip(), *dst.ip(), protocol::UDP, &segment) {
        0 => 0xFFFF,
        sum => sum,
    };
    BigEndian::write_u16(&mut segment[6..8], sum);
    segment
}

/// A received datagram, waiting in a socket's queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpDatagram {
    pub src: SocketAddrV4,
    pub dst: SocketAddrV4,
    pub payload: Vec<u8>,
}

pub struct UdpHandler {
    ip: Arc<IpLayer>,
    queue_len: usize,
    sockets: Mutex<HashMap<u16, VecDeque<UdpDatagram>>>,
}

impl UdpHandler {
    pub fn new(ip: Arc<IpLayer>, queue_len: usize) -> Self {
        UdpHandler {
            ip,
            queue_len,
            sockets: Mutex::new(HashMap::new()),
        }
    }

    /// Send `data` from `src` to `dst`
    pub fn send(&self, src: SocketAddrV4, dst: SocketAddrV4, data: &[u8]) -> Result<Disposition> {
        if UDP_HEADER_LEN + data.len() > MAX_PAYLOAD_LEN {
            return Err(NetError::InvalidArgument);
        }
        let segment = build_segment(src, dst, data);
        let disposition = self.ip.send(*src.ip(), *dst.ip(), protocol::UDP, &segment)?;
        log::trace!("UDP {} -> {}: {} bytes", src, dst, data.len());
        Ok(disposition)
    }

    /// Validate length and checksum of the UDP segment carried by `datagram`
    pub fn parse(datagram: &Datagram) -> Result<UdpDatagram> {
        let packet = &datagram.payload;
        let header = UdpHeader::from_bytes(packet).ok_or(NetError::InvalidArgument)?;
        let length = header.length as usize;
        if length < UDP_HEADER_LEN || length > packet.len() {
            return Err(NetError::InvalidArgument);
        }
        let segment = &packet[..length];
        if header.checksum != 0
            && transport_checksum(datagram.src, datagram.dst, protocol::UDP, segment) != 0
        {
            return Err(NetError::ChecksumMismatch);
        }

        Ok(UdpDatagram {
            src: SocketAddrV4::new(datagram.src, header.src_port),
            dst: SocketAddrV4::new(datagram.dst, header.dst_port),
            payload: segment[UDP_HEADER_LEN..].to_vec(),
        })
    }

    /// Queue a parsed datagram on the socket bound to its destination port
    pub fn deliver(&self, datagram: UdpDatagram) -> Result<()> {
        let mut sockets = self.sockets.lock();
        let queue = sockets.get_mut(&datagram.dst.port()).ok_or(NetError::NotFound)?;
        if queue.len() >= self.queue_len {
            log::debug!("UDP queue for port {} full, dropping", datagram.dst.port());
            return Err(NetError::ResourceExhausted);
        }
        queue.push_back(datagram);
        Ok(())
    }

    /// Parse and deliver an inbound datagram
    pub fn handle(&self, datagram: &Datagram) -> Result<()> {
        let parsed = Self::parse(datagram).map_err(|err| {
            log::debug!("Dropping UDP datagram from {}: {}", datagram.src, err);
            err
        })?;
        self.deliver(parsed)
    }

    pub fn bind(&self, port: u16) -> Result<()> {
        if port == 0 {
            return Err(NetError::InvalidArgument);
        }
        let mut sockets = self.sockets.lock();
        if sockets.contains_key(&port) {
            return Err(NetError::InvalidArgument);
        }
        sockets.insert(port, VecDeque::new());
        log::debug!("UDP port {} bound", port);
        Ok(())
    }

    /// Unbind `port`, discarding anything still queued
    pub fn unbind(&self, port: u16) -> Result<()> {
        self.sockets
            .lock()
            .remove(&port)
            .map(|_| ())
            .ok_or(NetError::NotFound)
    }

    /// Dequeue the oldest datagram for `port`
    pub fn recv_from(&self, port: u16) -> Result<Option<UdpDatagram>> {
        let mut sockets = self.sockets.lock();
        let queue = sockets.get_mut(&port).ok_or(NetError::NotFound)?;
        Ok(queue.pop_front())
    }

    pub fn is_bound(&self, port: u16) -> bool {
        self.sockets.lock().contains_key(&port)
    }

    /// Unbind every port
    pub fn shutdown(&self) {
        self.sockets.lock().clear();
    }
}
