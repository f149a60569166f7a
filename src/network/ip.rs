//! IP layer: packet construction, verification and the policy boundary
//!
//! Outbound: route lookup, NAT source rewrite, firewall, IPv4 header,
//! driver. Inbound: structural checks, header checksum, firewall on the
//! wire tuple, NAT destination rewrite. Protocol demultiplexing of the
//! resulting [`Datagram`] happens in [`crate::iface::stack::NetStack`].

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};

use crate::error::{NetError, Result};
use crate::iface::driver::Driver;
use crate::network::checksum_adjust;
use crate::network::firewall::{Firewall, FirewallAction, PacketTuple};
use crate::network::ipv4::{self, flags, protocol, Ipv4Header, MAX_PAYLOAD_LEN};
use crate::network::nat::NatTable;
use crate::network::route::RouteTable;

/// A verified inbound packet, after reverse NAT
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub protocol: u8,
    pub ttl: u8,
    pub payload: Vec<u8>,
}

/// Outcome of a send that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Handed to the driver
    Sent,
    /// Dropped by the firewall
    Filtered,
}

#[derive(Debug, Default)]
struct IpStats {
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    no_route: AtomicU64,
    checksum_errors: AtomicU64,
    malformed: AtomicU64,
    filtered_outbound: AtomicU64,
    filtered_inbound: AtomicU64,
    nat_translations: AtomicU64,
}

/// Snapshot of the IP layer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IpStatsSnapshot {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub no_route: u64,
    pub checksum_errors: u64,
    pub malformed: u64,
    pub filtered_outbound: u64,
    pub filtered_inbound: u64,
    pub nat_translations: u64,
}

pub struct IpLayer {
    routes: Arc<RouteTable>,
    nat: Arc<NatTable>,
    firewall: Arc<Firewall>,
    driver: Arc<dyn Driver>,
    ttl: u8,
    next_id: AtomicU16,
    stats: IpStats,
}

impl IpLayer {
    pub fn new(
        routes: Arc<RouteTable>,
        nat: Arc<NatTable>,
        firewall: Arc<Firewall>,
        driver: Arc<dyn Driver>,
        ttl: u8,
    ) -> Self {
        IpLayer {
            routes,
            nat,
            firewall,
            driver,
            ttl,
            next_id: AtomicU16::new(1),
            stats: IpStats::default(),
        }
    }

    /// Wrap `payload` (a complete transport segment) in an IPv4 header and
    /// transmit it
    ///
    /// A firewall deny is not an error: the packet is counted and dropped and
    /// `Disposition::Filtered` is returned.
    pub fn send(&self, src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, payload: &[u8]) -> Result<Disposition> {
        if payload.is_empty() || payload.len() > MAX_PAYLOAD_LEN {
            return Err(NetError::InvalidArgument);
        }
        let (mut src_port, dst_port) = transport_ports(protocol, payload)?;

        let route = self.routes.lookup_route(dst).map_err(|err| {
            self.stats.no_route.fetch_add(1, Ordering::Relaxed);
            log::debug!("No route to {}", dst);
            err
        })?;

        let mut segment = payload.to_vec();
        let mut src = src;
        if let Some(external) = self
            .nat
            .translate_outbound(SocketAddrV4::new(src, src_port), protocol)
        {
            rewrite_endpoint(protocol, &mut segment, Endpoint::Source, src, src_port, external);
            log::trace!("NAT out: {}:{} -> {}", src, src_port, external);
            src = *external.ip();
            src_port = external.port();
            self.stats.nat_translations.fetch_add(1, Ordering::Relaxed);
        }

        let tuple = PacketTuple {
            src,
            dst,
            src_port,
            dst_port,
            protocol,
        };
        if self.firewall.evaluate(&tuple) == FirewallAction::Deny {
            self.stats.filtered_outbound.fetch_add(1, Ordering::Relaxed);
            log::debug!("Firewall dropped outbound {:?}", tuple);
            return Ok(Disposition::Filtered);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let header = Ipv4Header::new(protocol, src, dst, segment.len() as u16, id, self.ttl);
        let packet = header.build_packet(&segment);
        self.driver.transmit(&route, route.next_hop(dst), &packet)?;

        self.stats.packets_sent.fetch_add(1, Ordering::Relaxed);
        log::trace!(
            "IP packet sent: {} -> {}, protocol: {}, length: {}",
            src,
            dst,
            protocol,
            packet.len()
        );
        Ok(Disposition::Sent)
    }

    /// Verify an inbound packet and prepare it for demultiplexing
    ///
    /// Returns `Ok(None)` when the firewall drops the packet and
    /// `Err(ChecksumMismatch)` when the header checksum is wrong.
    pub fn recv(&self, packet: &[u8]) -> Result<Option<Datagram>> {
        let header = Ipv4Header::from_bytes(packet)
            .ok_or(NetError::InvalidArgument)
            .and_then(|h| h.validate(packet.len()).map(|_| h))
            .map_err(|err| {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                err
            })?;

        if !ipv4::verify_checksum(packet, header.header_len()) {
            self.stats.checksum_errors.fetch_add(1, Ordering::Relaxed);
            log::debug!(
                "IP checksum mismatch from {}: stored {:#06x}, computed {:#06x}",
                header.src_addr,
                header.checksum,
                header.calculate_checksum()
            );
            return Err(NetError::ChecksumMismatch);
        }

        // Fragments are not reassembled
        if header.flags_frag_offset & (flags::MORE_FRAGMENTS | flags::FRAGMENT_OFFSET_MASK) != 0 {
            self.stats.malformed.fetch_add(1, Ordering::Relaxed);
            log::debug!("Dropping fragment from {}", header.src_addr);
            return Err(NetError::InvalidArgument);
        }

        let mut payload = packet[header.header_len()..header.total_len as usize].to_vec();
        let (src_port, dst_port) = transport_ports(header.protocol, &payload).map_err(|err| {
            self.stats.malformed.fetch_add(1, Ordering::Relaxed);
            err
        })?;

        let tuple = PacketTuple {
            src: header.src_addr,
            dst: header.dst_addr,
            src_port,
            dst_port,
            protocol: header.protocol,
        };
        if self.firewall.evaluate(&tuple) == FirewallAction::Deny {
            self.stats.filtered_inbound.fetch_add(1, Ordering::Relaxed);
            log::debug!("Firewall dropped inbound {:?}", tuple);
            return Ok(None);
        }

        let mut dst = header.dst_addr;
        if let Some(internal) = self
            .nat
            .translate_inbound(SocketAddrV4::new(dst, dst_port), header.protocol)
        {
            rewrite_endpoint(header.protocol, &mut payload, Endpoint::Destination, dst, dst_port, internal);
            log::trace!("NAT in: {}:{} -> {}", dst, dst_port, internal);
            dst = *internal.ip();
            self.stats.nat_translations.fetch_add(1, Ordering::Relaxed);
        }

        self.stats.packets_received.fetch_add(1, Ordering::Relaxed);
        Ok(Some(Datagram {
            src: header.src_addr,
            dst,
            protocol: header.protocol,
            ttl: header.ttl,
            payload,
        }))
    }

    pub fn stats(&self) -> IpStatsSnapshot {
        IpStatsSnapshot {
            packets_sent: self.stats.packets_sent.load(Ordering::Relaxed),
            packets_received: self.stats.packets_received.load(Ordering::Relaxed),
            no_route: self.stats.no_route.load(Ordering::Relaxed),
            checksum_errors: self.stats.checksum_errors.load(Ordering::Relaxed),
            malformed: self.stats.malformed.load(Ordering::Relaxed),
            filtered_outbound: self.stats.filtered_outbound.load(Ordering::Relaxed),
            filtered_inbound: self.stats.filtered_inbound.load(Ordering::Relaxed),
            nat_translations: self.stats.nat_translations.load(Ordering::Relaxed),
        }
    }
}

fn has_ports(protocol: u8) -> bool {
    protocol == protocol::TCP || protocol == protocol::UDP
}

/// Source and destination port of a TCP or UDP segment; (0, 0) otherwise
fn transport_ports(protocol: u8, segment: &[u8]) -> Result<(u16, u16)> {
    if !has_ports(protocol) {
        return Ok((0, 0));
    }
    if segment.len() < 4 {
        return Err(NetError::InvalidArgument);
    }
    Ok((
        BigEndian::read_u16(&segment[0..2]),
        BigEndian::read_u16(&segment[2..4]),
    ))
}

#[derive(Clone, Copy)]
enum Endpoint {
    Source,
    Destination,
}

/// Write the translated port into the segment and patch the transport
/// checksum for the changed pseudo-header address and port
fn rewrite_endpoint(
    protocol: u8,
    segment: &mut [u8],
    endpoint: Endpoint,
    old_addr: Ipv4Addr,
    old_port: u16,
    new: SocketAddrV4,
) {
    let checksum_offset = match protocol {
        protocol::TCP if segment.len() >= 18 => 16,
        protocol::UDP if segment.len() >= 8 => 6,
        _ => return,
    };

    let port_offset = match endpoint {
        Endpoint::Source => 0,
        Endpoint::Destination => 2,
    };
    BigEndian::write_u16(&mut segment[port_offset..port_offset + 2], new.port());

    let old = BigEndian::read_u16(&segment[checksum_offset..checksum_offset + 2]);
    // A zero UDP checksum means "not computed" and stays that way
    if protocol == protocol::UDP && old == 0 {
        return;
    }
    let old_ip = u32::from(old_addr);
    let new_ip = u32::from(*new.ip());
    let mut adjusted = checksum_adjust(
        old,
        &[(old_ip >> 16) as u16, old_ip as u16, old_port],
        &[(new_ip >> 16) as u16, new_ip as u16, new.port()],
    );
    if protocol == protocol::UDP && adjusted == 0 {
        adjusted = 0xFFFF;
    }
    BigEndian::write_u16(&mut segment[checksum_offset..checksum_offset + 2], adjusted);
}
