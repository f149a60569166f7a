//! TUN device driver
//!
//! Wraps a `tun_tap` interface opened without packet information, so every
//! read and write is exactly one raw IPv4 packet.

use std::io;
use std::net::Ipv4Addr;

use tun_tap::{Iface, Mode};

use crate::iface::driver::Driver;
use crate::network::route::Route;

/// Largest packet read from the device
pub const TUN_MTU: usize = 1504;

pub struct TunDriver {
    iface: Iface,
}

impl TunDriver {
    /// Create (or attach to) the TUN device `name`
    ///
    /// Requires CAP_NET_ADMIN. The name may contain `%d` to let the kernel
    /// pick a free index.
    pub fn open(name: &str) -> io::Result<Self> {
        let iface = Iface::without_packet_info(name, Mode::Tun)?;
        log::info!("TUN device created: {}", iface.name());
        Ok(TunDriver { iface })
    }

    /// Name the kernel actually assigned
    pub fn name(&self) -> &str {
        self.iface.name()
    }

    /// Block until one packet arrives
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.iface.recv(buf)
    }
}

impl Driver for TunDriver {
    fn transmit(&self, route: &Route, next_hop: Ipv4Addr, packet: &[u8]) -> io::Result<()> {
        if route.interface != self.iface.name() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no device {}", route.interface),
            ));
        }
        // Point-to-point: the next hop needs no link-layer resolution
        log::trace!("tun {} -> {}: {} bytes", self.iface.name(), next_hop, packet.len());
        self.iface.send(packet)?;
        Ok(())
    }
}
