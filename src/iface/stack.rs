//! The assembled protocol stack
//!
//! [`NetStack`] wires the tables, the IP layer and the protocol handlers
//! together and is the only thing a platform has to drive: hand it every
//! inbound IPv4 packet and call [`NetStack::tick`] periodically.

use std::sync::Arc;

use crate::config::StackConfig;
use crate::error::Result;
use crate::iface::driver::Driver;
use crate::network::firewall::Firewall;
use crate::network::icmp::IcmpHandler;
use crate::network::ip::IpLayer;
use crate::network::ipv4::protocol;
use crate::network::nat::NatTable;
use crate::network::route::RouteTable;
use crate::time::Clock;
use crate::transport::engine::TcpEngine;
use crate::transport::udp::UdpHandler;

pub struct NetStack {
    clock: Arc<dyn Clock>,
    routes: Arc<RouteTable>,
    nat: Arc<NatTable>,
    firewall: Arc<Firewall>,
    ip: Arc<IpLayer>,
    tcp: TcpEngine,
    udp: UdpHandler,
    icmp: IcmpHandler,
}

impl NetStack {
    pub fn new(config: StackConfig, driver: Arc<dyn Driver>, clock: Arc<dyn Clock>) -> Self {
        let routes = Arc::new(RouteTable::new(config.ip.route_capacity));
        let nat = Arc::new(NatTable::new(
            config.nat.capacity,
            config.nat.idle_timeout_ms,
            clock.clone(),
        ));
        let firewall = Arc::new(Firewall::new(
            config.firewall.capacity,
            config.firewall.default_action,
        ));
        let ip = Arc::new(IpLayer::new(
            routes.clone(),
            nat.clone(),
            firewall.clone(),
            driver,
            config.ip.default_ttl,
        ));
        let tcp = TcpEngine::new(config.tcp, ip.clone(), clock.clone());
        let udp = UdpHandler::new(ip.clone(), config.udp.socket_queue_len);
        let icmp = IcmpHandler::new(ip.clone());
        log::info!("Network stack initialized");

        NetStack {
            clock,
            routes,
            nat,
            firewall,
            ip,
            tcp,
            udp,
            icmp,
        }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn nat(&self) -> &NatTable {
        &self.nat
    }

    pub fn firewall(&self) -> &Firewall {
        &self.firewall
    }

    pub fn ip(&self) -> &IpLayer {
        &self.ip
    }

    pub fn tcp(&self) -> &TcpEngine {
        &self.tcp
    }

    pub fn udp(&self) -> &UdpHandler {
        &self.udp
    }

    pub fn icmp(&self) -> &IcmpHandler {
        &self.icmp
    }

    /// Process one inbound IPv4 packet
    ///
    /// Packets the firewall drops, and protocols nobody handles, are
    /// discarded without an error.
    pub fn receive(&self, packet: &[u8]) -> Result<()> {
        let datagram = match self.ip.recv(packet)? {
            Some(datagram) => datagram,
            None => return Ok(()),
        };

        match datagram.protocol {
            protocol::ICMP => self.icmp.handle(&datagram),
            protocol::TCP => self.tcp.handle(&datagram),
            protocol::UDP => self.udp.handle(&datagram),
            other => {
                log::debug!("Unsupported protocol {} from {}", other, datagram.src);
                Ok(())
            }
        }
    }

    /// Drive TCP timers and expire idle NAT rules
    pub fn tick(&self) {
        let now = self.clock.now_ms();
        self.tcp.tick(now);
        let evicted = self.nat.evict_idle(now);
        if evicted > 0 {
            log::debug!("Evicted {} idle NAT rules", evicted);
        }
    }

    /// Close every TCP connection and unbind every UDP port
    pub fn shutdown(&self) {
        self.tcp.shutdown_all();
        self.udp.shutdown();
        log::info!("Network stack shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iface::driver::QueueDriver;
    use crate::network::firewall::{FirewallAction, RuleMatch};
    use crate::network::ipv4::Ipv4Header;
    use crate::time::ManualClock;
    use crate::transport::tcp::TcpState;
    use crate::NetError;
    use std::net::{Ipv4Addr, SocketAddrV4};

    const A: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 1);
    const B: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 2);

    struct Node {
        stack: NetStack,
        driver: Arc<QueueDriver>,
    }

    fn node(clock: &Arc<ManualClock>, default_action: FirewallAction) -> Node {
        let mut config = StackConfig::default();
        config.firewall.default_action = default_action;
        config.nat.idle_timeout_ms = 1_000;
        let driver = Arc::new(QueueDriver::new());
        let stack = NetStack::new(config, driver.clone(), clock.clone());
        stack
            .routes()
            .add_route(
                Ipv4Addr::new(192, 168, 0, 0),
                Ipv4Addr::new(255, 255, 255, 0),
                Ipv4Addr::UNSPECIFIED,
                "eth0",
            )
            .unwrap();
        Node { stack, driver }
    }

    fn deliver(from: &Node, to: &Node) -> usize {
        let packets = from.driver.drain();
        for packet in &packets {
            let _ = to.stack.receive(&packet.data);
        }
        packets.len()
    }

    #[test]
    fn test_ping_between_stacks() {
        let clock = Arc::new(ManualClock::new(0));
        let a = node(&clock, FirewallAction::Allow);
        let b = node(&clock, FirewallAction::Allow);

        a.stack.icmp().ping(A, B, 7).unwrap();
        assert_eq!(deliver(&a, &b), 1);
        assert_eq!(deliver(&b, &a), 1);

        let replies = a.stack.icmp().take_echo_replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].from, B);
        assert_eq!(replies[0].sequence, 7);
        assert_eq!(replies[0].payload_len, 64);
    }

    #[test]
    fn test_udp_between_stacks() {
        let clock = Arc::new(ManualClock::new(0));
        let a = node(&clock, FirewallAction::Allow);
        let b = node(&clock, FirewallAction::Allow);
        b.stack.udp().bind(53).unwrap();

        a.stack
            .udp()
            .send(SocketAddrV4::new(A, 3000), SocketAddrV4::new(B, 53), b"lookup")
            .unwrap();
        deliver(&a, &b);
        let datagram = b.stack.udp().recv_from(53).unwrap().unwrap();
        assert_eq!(datagram.src, SocketAddrV4::new(A, 3000));
        assert_eq!(datagram.payload, b"lookup");
    }

    #[test]
    fn test_tcp_between_stacks() {
        let clock = Arc::new(ManualClock::new(0));
        let a = node(&clock, FirewallAction::Allow);
        let b = node(&clock, FirewallAction::Allow);
        let listener = b.stack.tcp().listen(SocketAddrV4::new(B, 8080), 8).unwrap();
        let client = a
            .stack
            .tcp()
            .connect(SocketAddrV4::new(A, 50000), SocketAddrV4::new(B, 8080))
            .unwrap();
        while deliver(&a, &b) + deliver(&b, &a) > 0 {}

        let server = b.stack.tcp().accept(listener).unwrap();
        assert_eq!(a.stack.tcp().get_state(client), Ok(TcpState::Established));
        assert_eq!(b.stack.tcp().get_state(server), Ok(TcpState::Established));

        b.stack.shutdown();
        assert_eq!(b.stack.tcp().connection_count(), 0);
        while deliver(&a, &b) + deliver(&b, &a) > 0 {}
        assert_eq!(a.stack.tcp().get_state(client), Ok(TcpState::Closed));
    }

    #[test]
    fn test_default_deny_drops_inbound() {
        let clock = Arc::new(ManualClock::new(0));
        let a = node(&clock, FirewallAction::Allow);
        let b = node(&clock, FirewallAction::Deny);
        b.stack.udp().bind(53).unwrap();

        a.stack
            .udp()
            .send(SocketAddrV4::new(A, 3000), SocketAddrV4::new(B, 53), b"x")
            .unwrap();
        deliver(&a, &b);
        assert_eq!(b.stack.udp().recv_from(53), Ok(None));
        assert_eq!(b.stack.ip().stats().filtered_inbound, 1);

        // An explicit allow rule opens the port
        b.stack
            .firewall()
            .add_rule(RuleMatch::any().dst_port(53), FirewallAction::Allow)
            .unwrap();
        a.stack
            .udp()
            .send(SocketAddrV4::new(A, 3000), SocketAddrV4::new(B, 53), b"y")
            .unwrap();
        deliver(&a, &b);
        assert_eq!(b.stack.udp().recv_from(53).unwrap().unwrap().payload, b"y");
    }

    #[test]
    fn test_tick_evicts_idle_nat_rules() {
        let clock = Arc::new(ManualClock::new(0));
        let a = node(&clock, FirewallAction::Allow);
        a.stack
            .nat()
            .add_rule(
                SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 5), 1234),
                SocketAddrV4::new(Ipv4Addr::new(203, 0, 113, 9), 5000),
                protocol::TCP,
            )
            .unwrap();
        clock.advance(500);
        a.stack.tick();
        assert_eq!(a.stack.nat().len(), 1);
        clock.advance(1_000);
        a.stack.tick();
        assert!(a.stack.nat().is_empty());
    }

    #[test]
    fn test_receive_errors_and_unknown_protocols() {
        let clock = Arc::new(ManualClock::new(0));
        let a = node(&clock, FirewallAction::Allow);
        assert_eq!(a.stack.receive(&[0x45]), Err(NetError::InvalidArgument));

        // GRE is not handled: accepted by IP, then ignored
        let packet = Ipv4Header::new(47, B, A, 0, 1, 64).build_packet(&[0; 8]);
        assert_eq!(a.stack.receive(&packet), Ok(()));
        assert_eq!(a.stack.ip().stats().packets_received, 1);
    }
}
