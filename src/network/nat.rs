//! Static NAT with idle expiry
//!
//! Each rule binds an internal (address, port) to an external (address, port)
//! for one protocol. Outbound packets from the internal tuple leave with the
//! external tuple as their source; inbound packets addressed to the external
//! tuple are delivered to the internal one. Every translation refreshes the
//! rule's timestamp, and rules idle for longer than the configured timeout
//! are removed by [`NatTable::evict_idle`].

use std::net::SocketAddrV4;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{NetError, Result};
use crate::time::Clock;

/// One translation rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatRule {
    pub internal: SocketAddrV4,
    pub external: SocketAddrV4,
    pub protocol: u8,
    /// Last time the rule was added or used, in clock milliseconds
    pub last_used_ms: u64,
}

pub struct NatTable {
    rules: Mutex<Vec<NatRule>>,
    capacity: usize,
    idle_timeout_ms: u64,
    clock: Arc<dyn Clock>,
}

impl NatTable {
    pub fn new(capacity: usize, idle_timeout_ms: u64, clock: Arc<dyn Clock>) -> Self {
        NatTable {
            rules: Mutex::new(Vec::new()),
            capacity,
            idle_timeout_ms,
            clock,
        }
    }

    /// Add a rule, replacing the external side of an existing rule for the
    /// same internal tuple and protocol
    ///
    /// An external tuple may only be claimed by one rule per protocol, since
    /// inbound translation would otherwise be ambiguous.
    pub fn add_rule(&self, internal: SocketAddrV4, external: SocketAddrV4, protocol: u8) -> Result<()> {
        let now = self.clock.now_ms();
        let mut rules = self.rules.lock();

        if rules
            .iter()
            .any(|r| r.protocol == protocol && r.external == external && r.internal != internal)
        {
            log::warn!("NAT external {} (proto {}) already mapped", external, protocol);
            return Err(NetError::InvalidArgument);
        }

        if let Some(rule) = rules
            .iter_mut()
            .find(|r| r.internal == internal && r.protocol == protocol)
        {
            rule.external = external;
            rule.last_used_ms = now;
            log::info!("NAT rule updated: {} -> {} (proto {})", internal, external, protocol);
            return Ok(());
        }

        if rules.len() >= self.capacity {
            log::warn!("NAT table full ({} rules)", self.capacity);
            return Err(NetError::ResourceExhausted);
        }

        rules.push(NatRule {
            internal,
            external,
            protocol,
            last_used_ms: now,
        });
        log::info!("NAT rule added: {} -> {} (proto {})", internal, external, protocol);
        Ok(())
    }

    pub fn remove_rule(&self, internal: SocketAddrV4, protocol: u8) -> Result<()> {
        let mut rules = self.rules.lock();
        match rules
            .iter()
            .position(|r| r.internal == internal && r.protocol == protocol)
        {
            Some(index) => {
                rules.remove(index);
                log::info!("NAT rule removed: {} (proto {})", internal, protocol);
                Ok(())
            }
            None => {
                log::warn!("NAT rule not found: {} (proto {})", internal, protocol);
                Err(NetError::NotFound)
            }
        }
    }

    /// Egress translation: external tuple for an outgoing source tuple
    pub fn translate_outbound(&self, src: SocketAddrV4, protocol: u8) -> Option<SocketAddrV4> {
        let now = self.clock.now_ms();
        let mut rules = self.rules.lock();
        let rule = rules
            .iter_mut()
            .find(|r| r.internal == src && r.protocol == protocol)?;
        rule.last_used_ms = now;
        Some(rule.external)
    }

    /// Ingress translation: internal tuple for an incoming destination tuple
    pub fn translate_inbound(&self, dst: SocketAddrV4, protocol: u8) -> Option<SocketAddrV4> {
        let now = self.clock.now_ms();
        let mut rules = self.rules.lock();
        let rule = rules
            .iter_mut()
            .find(|r| r.external == dst && r.protocol == protocol)?;
        rule.last_used_ms = now;
        Some(rule.internal)
    }

    /// Drop rules unused for longer than the idle timeout; returns how many
    pub fn evict_idle(&self, now_ms: u64) -> usize {
        let mut rules = self.rules.lock();
        let before = rules.len();
        let timeout = self.idle_timeout_ms;
        rules.retain(|r| {
            let keep = now_ms.saturating_sub(r.last_used_ms) <= timeout;
            if !keep {
                log::debug!("NAT rule expired: {} -> {} (proto {})", r.internal, r.external, r.protocol);
            }
            keep
        });
        before - rules.len()
    }

    pub fn rules(&self) -> Vec<NatRule> {
        self.rules.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.rules.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.lock().is_empty()
    }

    pub fn clear(&self) {
        self.rules.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ipv4::protocol;
    use crate::time::ManualClock;
    use std::net::Ipv4Addr;

    fn sock(a: u8, b: u8, c: u8, d: u8, port: u16) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(a, b, c, d), port)
    }

    fn table(capacity: usize) -> (NatTable, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        (NatTable::new(capacity, 5_000, clock.clone()), clock)
    }

    #[test]
    fn test_round_trip() {
        let (nat, _) = table(8);
        let internal = sock(10, 0, 0, 5, 1234);
        let external = sock(203, 0, 113, 9, 5000);
        nat.add_rule(internal, external, protocol::TCP).unwrap();

        assert_eq!(nat.translate_outbound(internal, protocol::TCP), Some(external));
        assert_eq!(nat.translate_inbound(external, protocol::TCP), Some(internal));
        assert_eq!(nat.translate_outbound(internal, protocol::UDP), None);
        assert_eq!(nat.translate_inbound(sock(203, 0, 113, 9, 5001), protocol::TCP), None);
    }

    #[test]
    fn test_one_rule_per_internal_tuple() {
        let (nat, _) = table(8);
        let internal = sock(10, 0, 0, 5, 1234);
        nat.add_rule(internal, sock(1, 1, 1, 1, 1), protocol::UDP).unwrap();
        nat.add_rule(internal, sock(2, 2, 2, 2, 2), protocol::UDP).unwrap();
        assert_eq!(nat.len(), 1);
        assert_eq!(nat.translate_outbound(internal, protocol::UDP), Some(sock(2, 2, 2, 2, 2)));

        // Same internal tuple under another protocol is a separate rule
        nat.add_rule(internal, sock(2, 2, 2, 2, 2), protocol::TCP).unwrap();
        assert_eq!(nat.len(), 2);
    }

    #[test]
    fn test_external_tuple_cannot_be_shared() {
        let (nat, _) = table(8);
        let external = sock(203, 0, 113, 9, 5000);
        nat.add_rule(sock(10, 0, 0, 5, 1), external, protocol::TCP).unwrap();
        assert_eq!(
            nat.add_rule(sock(10, 0, 0, 6, 1), external, protocol::TCP),
            Err(NetError::InvalidArgument)
        );
    }

    #[test]
    fn test_capacity_and_remove() {
        let (nat, _) = table(1);
        nat.add_rule(sock(10, 0, 0, 1, 1), sock(1, 1, 1, 1, 1), protocol::TCP).unwrap();
        assert_eq!(
            nat.add_rule(sock(10, 0, 0, 2, 1), sock(1, 1, 1, 1, 2), protocol::TCP),
            Err(NetError::ResourceExhausted)
        );
        nat.remove_rule(sock(10, 0, 0, 1, 1), protocol::TCP).unwrap();
        assert_eq!(nat.remove_rule(sock(10, 0, 0, 1, 1), protocol::TCP), Err(NetError::NotFound));
        assert!(nat.is_empty());
    }

    #[test]
    fn test_idle_rules_are_evicted() {
        let (nat, clock) = table(8);
        let busy = sock(10, 0, 0, 1, 1);
        let idle = sock(10, 0, 0, 2, 1);
        nat.add_rule(busy, sock(1, 1, 1, 1, 1), protocol::UDP).unwrap();
        nat.add_rule(idle, sock(1, 1, 1, 1, 2), protocol::UDP).unwrap();

        clock.advance(4_000);
        assert!(nat.translate_outbound(busy, protocol::UDP).is_some());
        clock.advance(2_000);

        assert_eq!(nat.evict_idle(clock.now_ms()), 1);
        assert_eq!(nat.rules().len(), 1);
        assert_eq!(nat.rules()[0].internal, busy);
    }
}
