//! Ordered allow/deny packet filter
//!
//! Rules are evaluated in insertion order and the first match decides.
//! Every field of a rule's matcher may be left as a wildcard. Packets that
//! match no rule get the configured default action, which is `Deny` unless
//! the stack is configured otherwise.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::{NetError, Result};

/// Verdict of a rule or of the default policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirewallAction {
    Allow,
    Deny,
}

/// Addresses, ports and protocol of one packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketTuple {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
}

/// 5-tuple matcher; `None` matches anything
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuleMatch {
    pub src: Option<Ipv4Addr>,
    pub dst: Option<Ipv4Addr>,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
    pub protocol: Option<u8>,
}

impl RuleMatch {
    /// Matcher with every field wildcarded
    pub fn any() -> Self {
        Self::default()
    }

    pub fn src(mut self, addr: Ipv4Addr) -> Self {
        self.src = Some(addr);
        self
    }

    pub fn dst(mut self, addr: Ipv4Addr) -> Self {
        self.dst = Some(addr);
        self
    }

    pub fn src_port(mut self, port: u16) -> Self {
        self.src_port = Some(port);
        self
    }

    pub fn dst_port(mut self, port: u16) -> Self {
        self.dst_port = Some(port);
        self
    }

    pub fn protocol(mut self, protocol: u8) -> Self {
        self.protocol = Some(protocol);
        self
    }

    pub fn matches(&self, packet: &PacketTuple) -> bool {
        fn field<T: PartialEq>(want: Option<T>, got: T) -> bool {
            want.map_or(true, |w| w == got)
        }
        field(self.src, packet.src)
            && field(self.dst, packet.dst)
            && field(self.src_port, packet.src_port)
            && field(self.dst_port, packet.dst_port)
            && field(self.protocol, packet.protocol)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirewallRule {
    pub rule_id: u32,
    pub matcher: RuleMatch,
    pub action: FirewallAction,
}

/// Filter counters.
#[derive(Debug, Default)]
pub struct FirewallStats {
    /// Packets allowed, by a rule or by the default policy
    pub allowed: AtomicU64,
    /// Packets denied, by a rule or by the default policy
    pub denied: AtomicU64,
    /// Calls to evaluate
    pub evaluations: AtomicU64,
    /// Evaluations that fell through to the default policy
    pub default_hits: AtomicU64,
}

/// Snapshot of [`FirewallStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirewallStatsSnapshot {
    pub allowed: u64,
    pub denied: u64,
    pub evaluations: u64,
    pub default_hits: u64,
}

#[derive(Debug)]
struct RuleSet {
    rules: Vec<FirewallRule>,
    next_rule_id: u32,
}

#[derive(Debug)]
pub struct Firewall {
    state: Mutex<RuleSet>,
    capacity: usize,
    default_action: FirewallAction,
    stats: FirewallStats,
}

impl Firewall {
    pub fn new(capacity: usize, default_action: FirewallAction) -> Self {
        Firewall {
            state: Mutex::new(RuleSet {
                rules: Vec::new(),
                next_rule_id: 1,
            }),
            capacity,
            default_action,
            stats: FirewallStats::default(),
        }
    }

    /// Append a rule; returns its id
    pub fn add_rule(&self, matcher: RuleMatch, action: FirewallAction) -> Result<u32> {
        let mut state = self.state.lock();
        if state.rules.len() >= self.capacity {
            log::warn!("Firewall table full ({} rules)", self.capacity);
            return Err(NetError::ResourceExhausted);
        }

        let rule_id = state.next_rule_id;
        state.next_rule_id += 1;
        state.rules.push(FirewallRule {
            rule_id,
            matcher,
            action,
        });
        log::info!("Firewall rule {} added: {:?} {:?}", rule_id, action, matcher);
        Ok(rule_id)
    }

    pub fn remove_rule(&self, rule_id: u32) -> Result<()> {
        let mut state = self.state.lock();
        match state.rules.iter().position(|r| r.rule_id == rule_id) {
            Some(index) => {
                state.rules.remove(index);
                log::info!("Firewall rule {} removed", rule_id);
                Ok(())
            }
            None => {
                log::warn!("Firewall rule {} not found", rule_id);
                Err(NetError::NotFound)
            }
        }
    }

    /// Verdict for `packet`: first matching rule, else the default action
    pub fn evaluate(&self, packet: &PacketTuple) -> FirewallAction {
        self.stats.evaluations.fetch_add(1, Ordering::Relaxed);

        let matched = {
            let state = self.state.lock();
            state
                .rules
                .iter()
                .find(|r| r.matcher.matches(packet))
                .map(|r| r.action)
        };

        let action = matched.unwrap_or_else(|| {
            self.stats.default_hits.fetch_add(1, Ordering::Relaxed);
            self.default_action
        });
        match action {
            FirewallAction::Allow => self.stats.allowed.fetch_add(1, Ordering::Relaxed),
            FirewallAction::Deny => self.stats.denied.fetch_add(1, Ordering::Relaxed),
        };
        action
    }

    pub fn default_action(&self) -> FirewallAction {
        self.default_action
    }

    pub fn rules(&self) -> Vec<FirewallRule> {
        self.state.lock().rules.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().rules.is_empty()
    }

    /// Remove every rule; ids are not reused afterwards
    pub fn clear(&self) {
        self.state.lock().rules.clear();
    }

    pub fn stats(&self) -> FirewallStatsSnapshot {
        FirewallStatsSnapshot {
            allowed: self.stats.allowed.load(Ordering::Relaxed),
            denied: self.stats.denied.load(Ordering::Relaxed),
            evaluations: self.stats.evaluations.load(Ordering::Relaxed),
            default_hits: self.stats.default_hits.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ipv4::protocol;

    fn tcp_to(dst: Ipv4Addr, dst_port: u16) -> PacketTuple {
        PacketTuple {
            src: Ipv4Addr::new(192, 168, 1, 2),
            dst,
            src_port: 40000,
            dst_port,
            protocol: protocol::TCP,
        }
    }

    #[test]
    fn test_first_match_wins() {
        let fw = Firewall::new(16, FirewallAction::Allow);
        let server = Ipv4Addr::new(10, 0, 0, 1);
        fw.add_rule(RuleMatch::any().dst(server).dst_port(80), FirewallAction::Allow)
            .unwrap();
        fw.add_rule(RuleMatch::any().dst(server), FirewallAction::Deny)
            .unwrap();

        assert_eq!(fw.evaluate(&tcp_to(server, 80)), FirewallAction::Allow);
        assert_eq!(fw.evaluate(&tcp_to(server, 22)), FirewallAction::Deny);
        assert_eq!(
            fw.evaluate(&tcp_to(Ipv4Addr::new(10, 0, 0, 2), 22)),
            FirewallAction::Allow
        );
    }

    #[test]
    fn test_order_reversed_changes_verdict() {
        let fw = Firewall::new(16, FirewallAction::Allow);
        let server = Ipv4Addr::new(10, 0, 0, 1);
        fw.add_rule(RuleMatch::any().dst(server), FirewallAction::Deny)
            .unwrap();
        fw.add_rule(RuleMatch::any().dst(server).dst_port(80), FirewallAction::Allow)
            .unwrap();
        assert_eq!(fw.evaluate(&tcp_to(server, 80)), FirewallAction::Deny);
    }

    #[test]
    fn test_default_policy_and_stats() {
        let fw = Firewall::new(16, FirewallAction::Deny);
        let server = Ipv4Addr::new(10, 0, 0, 1);
        assert_eq!(fw.evaluate(&tcp_to(server, 80)), FirewallAction::Deny);

        fw.add_rule(RuleMatch::any().protocol(protocol::TCP), FirewallAction::Allow)
            .unwrap();
        assert_eq!(fw.evaluate(&tcp_to(server, 80)), FirewallAction::Allow);

        let stats = fw.stats();
        assert_eq!(stats.evaluations, 2);
        assert_eq!(stats.default_hits, 1);
        assert_eq!(stats.denied, 1);
        assert_eq!(stats.allowed, 1);
    }

    #[test]
    fn test_rule_ids_are_monotonic() {
        let fw = Firewall::new(2, FirewallAction::Deny);
        let first = fw.add_rule(RuleMatch::any(), FirewallAction::Allow).unwrap();
        let second = fw.add_rule(RuleMatch::any(), FirewallAction::Deny).unwrap();
        assert_eq!((first, second), (1, 2));
        assert_eq!(
            fw.add_rule(RuleMatch::any(), FirewallAction::Deny),
            Err(NetError::ResourceExhausted)
        );

        fw.remove_rule(first).unwrap();
        assert_eq!(fw.remove_rule(first), Err(NetError::NotFound));
        let third = fw.add_rule(RuleMatch::any(), FirewallAction::Allow).unwrap();
        assert_eq!(third, 3);

        fw.clear();
        assert!(fw.is_empty());
        assert_eq!(fw.add_rule(RuleMatch::any(), FirewallAction::Allow).unwrap(), 4);
    }

    #[test]
    fn test_every_field_can_be_matched() {
        let packet = tcp_to(Ipv4Addr::new(10, 0, 0, 1), 443);
        assert!(RuleMatch::any().src(packet.src).matches(&packet));
        assert!(!RuleMatch::any().src(Ipv4Addr::new(1, 2, 3, 4)).matches(&packet));
        assert!(RuleMatch::any().src_port(40000).matches(&packet));
        assert!(!RuleMatch::any().src_port(1).matches(&packet));
        assert!(!RuleMatch::any().protocol(protocol::UDP).matches(&packet));
    }
}
