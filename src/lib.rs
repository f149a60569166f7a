//! A reactive IPv4 TCP/IP protocol engine
//!
//! This library provides the protocol half of a kernel networking stack:
//! - IPv4 packet construction and verification
//! - Longest-prefix routing, NAT and a first-match firewall
//! - UDP datagrams and ICMP echo request/reply handling
//! - TCP connection management, retransmission and congestion control
//!
//! Nothing here owns a thread or a timer. The caller feeds inbound packets
//! to [`NetStack::receive`] and drives timeouts with [`NetStack::tick`].

pub mod config;
pub mod error;
pub mod iface;
pub mod network;
pub mod time;
pub mod transport;

// Re-export commonly used types
pub use config::StackConfig;
pub use error::{NetError, Result};
pub use iface::driver::{Driver, QueueDriver};
pub use iface::stack::NetStack;
pub use iface::tun::TunDriver;
pub use network::firewall::{Firewall, FirewallAction, RuleMatch};
pub use network::icmp::{IcmpHandler, IcmpHeader, ICMP_TYPE_ECHO_REPLY, ICMP_TYPE_ECHO_REQUEST};
pub use network::ip::{Datagram, IpLayer};
pub use network::ipv4::Ipv4Header;
pub use network::nat::NatTable;
pub use network::route::{Route, RouteTable};
pub use time::{Clock, ManualClock, MonotonicClock};
pub use transport::congestion::CongestionAlgorithm;
pub use transport::engine::{ConnectionId, ConnectionInfo, TcpEngine};
pub use transport::tcp::{TcpHeader, TcpState};
pub use transport::udp::{UdpDatagram, UdpHandler, UdpHeader};
