//! IPv4 routing table
//!
//! Maps destination networks to a gateway and an egress interface. Lookups
//! use longest-prefix match; a route with mask 0.0.0.0 is the default route
//! and therefore only wins when nothing more specific matches.

use std::net::Ipv4Addr;

use parking_lot::Mutex;

use crate::error::{NetError, Result};

/// One routing table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub destination: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub interface: String,
}

impl Route {
    /// Number of leading one bits in the mask
    pub fn prefix_len(&self) -> u32 {
        u32::from(self.mask).leading_ones()
    }

    /// Whether `addr` falls inside this route's network
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & u32::from(self.mask) == u32::from(self.destination)
    }

    pub fn is_default(&self) -> bool {
        u32::from(self.mask) == 0
    }

    /// Next hop for `dst`: the gateway, or `dst` itself on a directly
    /// connected network (gateway 0.0.0.0)
    pub fn next_hop(&self, dst: Ipv4Addr) -> Ipv4Addr {
        if self.gateway.is_unspecified() {
            dst
        } else {
            self.gateway
        }
    }
}

/// Bounded routing table guarded by its own lock
#[derive(Debug)]
pub struct RouteTable {
    routes: Mutex<Vec<Route>>,
    capacity: usize,
}

impl RouteTable {
    pub fn new(capacity: usize) -> Self {
        RouteTable {
            routes: Mutex::new(Vec::new()),
            capacity,
        }
    }

    /// Add a route, or update gateway and interface of the route with the
    /// same destination and mask
    pub fn add_route(
        &self,
        destination: Ipv4Addr,
        mask: Ipv4Addr,
        gateway: Ipv4Addr,
        interface: &str,
    ) -> Result<()> {
        let dst_bits = u32::from(destination);
        let mask_bits = u32::from(mask);
        // Masks must be contiguous and the network must carry no host bits
        if mask_bits.leading_ones() + mask_bits.trailing_zeros() != 32
            || dst_bits & mask_bits != dst_bits
            || interface.is_empty()
        {
            return Err(NetError::InvalidArgument);
        }

        let mut routes = self.routes.lock();
        if let Some(route) = routes
            .iter_mut()
            .find(|r| r.destination == destination && r.mask == mask)
        {
            route.gateway = gateway;
            route.interface = interface.to_string();
            log::info!(
                "Route updated: {}/{} -> {} via {}",
                destination,
                mask_bits.leading_ones(),
                gateway,
                interface
            );
            return Ok(());
        }

        if routes.len() >= self.capacity {
            log::warn!("Routing table full ({} entries)", self.capacity);
            return Err(NetError::ResourceExhausted);
        }

        routes.push(Route {
            destination,
            mask,
            gateway,
            interface: interface.to_string(),
        });
        log::info!(
            "Route added: {}/{} -> {} via {}",
            destination,
            mask_bits.leading_ones(),
            gateway,
            interface
        );
        Ok(())
    }

    /// Remove the route with exactly this destination and mask
    pub fn remove_route(&self, destination: Ipv4Addr, mask: Ipv4Addr) -> Result<()> {
        let mut routes = self.routes.lock();
        match routes
            .iter()
            .position(|r| r.destination == destination && r.mask == mask)
        {
            Some(index) => {
                routes.remove(index);
                log::info!("Route removed: {}/{}", destination, mask);
                Ok(())
            }
            None => {
                log::warn!("Route not found: {}/{}", destination, mask);
                Err(NetError::NotFound)
            }
        }
    }

    /// Longest-prefix match for `dst`
    ///
    /// Among equally specific matches the most recently added entry wins.
    pub fn lookup_route(&self, dst: Ipv4Addr) -> Result<Route> {
        let routes = self.routes.lock();
        let mut best: Option<&Route> = None;
        for route in routes.iter().filter(|r| r.contains(dst)) {
            match best {
                Some(current) if current.prefix_len() > route.prefix_len() => {}
                _ => best = Some(route),
            }
        }
        best.cloned().ok_or(NetError::NotFound)
    }

    /// Snapshot of all routes in insertion order
    pub fn routes(&self) -> Vec<Route> {
        self.routes.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.routes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.lock().is_empty()
    }

    pub fn clear(&self) {
        self.routes.lock().clear();
    }
}
