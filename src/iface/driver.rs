//! Network driver abstraction
//!
//! The IP layer hands finished IPv4 packets to a [`Driver`] together with
//! the route that selected the egress interface. Link-layer framing and
//! address resolution are the driver's business.

use std::collections::VecDeque;
use std::io;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::network::route::Route;

pub trait Driver: Send + Sync {
    /// Transmit one IPv4 packet towards `next_hop` on `route.interface`
    fn transmit(&self, route: &Route, next_hop: Ipv4Addr, packet: &[u8]) -> io::Result<()>;
}

/// A packet captured by [`QueueDriver`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingPacket {
    pub interface: String,
    pub next_hop: Ipv4Addr,
    pub data: Vec<u8>,
}

/// Driver that queues packets in memory
///
/// Tests use it to inspect what the stack put on the wire, and to shuttle
/// packets between two stacks.
#[derive(Debug)]
pub struct QueueDriver {
    output_queue: Mutex<VecDeque<OutgoingPacket>>,
    link_up: AtomicBool,
}

impl QueueDriver {
    pub fn new() -> Self {
        QueueDriver {
            output_queue: Mutex::new(VecDeque::new()),
            link_up: AtomicBool::new(true),
        }
    }

    /// While the link is down every transmit fails with `NotConnected`
    pub fn set_link_up(&self, up: bool) {
        self.link_up.store(up, Ordering::SeqCst);
    }

    /// Get the next packet from output queue
    pub fn dequeue(&self) -> Option<OutgoingPacket> {
        self.output_queue.lock().pop_front()
    }

    /// Take every queued packet
    pub fn drain(&self) -> Vec<OutgoingPacket> {
        self.output_queue.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.output_queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.output_queue.lock().is_empty()
    }
}

impl Default for QueueDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for QueueDriver {
    fn transmit(&self, route: &Route, next_hop: Ipv4Addr, packet: &[u8]) -> io::Result<()> {
        if !self.link_up.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "link down"));
        }
        self.output_queue.lock().push_back(OutgoingPacket {
            interface: route.interface.clone(),
            next_hop,
            data: packet.to_vec(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route() -> Route {
        Route {
            destination: Ipv4Addr::new(0, 0, 0, 0),
            mask: Ipv4Addr::new(0, 0, 0, 0),
            gateway: Ipv4Addr::new(10, 0, 0, 254),
            interface: "eth0".to_string(),
        }
    }

    #[test]
    fn test_queue_driver_captures_in_order() {
        let driver = QueueDriver::new();
        let hop = Ipv4Addr::new(10, 0, 0, 254);
        driver.transmit(&route(), hop, &[1]).unwrap();
        driver.transmit(&route(), hop, &[2]).unwrap();
        assert_eq!(driver.len(), 2);
        assert_eq!(driver.dequeue().unwrap().data, vec![1]);
        let rest = driver.drain();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].interface, "eth0");
        assert!(driver.is_empty());
    }

    #[test]
    fn test_link_down_fails_transmit() {
        let driver = QueueDriver::new();
        driver.set_link_up(false);
        let err = driver
            .transmit(&route(), Ipv4Addr::new(10, 0, 0, 254), &[1])
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        assert!(driver.is_empty());
    }
}
