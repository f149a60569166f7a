//! Stack configuration
//!
//! Every table bound and protocol timer lives here. All structs implement
//! `Default` with the values a general purpose host would use, so callers
//! normally start from `StackConfig::default()` and override single fields.

use crate::network::firewall::FirewallAction;
use crate::network::ipv4::DEFAULT_TTL;
use crate::transport::congestion::CongestionAlgorithm;

/// Top level configuration handed to [`crate::NetStack::new`]
#[derive(Debug, Clone, Default)]
pub struct StackConfig {
    pub tcp: TcpConfig,
    pub ip: IpConfig,
    pub nat: NatConfig,
    pub firewall: FirewallConfig,
    pub udp: UdpConfig,
}

/// TCP engine parameters
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Maximum number of connections held by the registry
    pub max_connections: usize,
    /// Send buffer capacity per connection, in bytes
    pub send_buffer_size: usize,
    /// Receive buffer capacity per connection, in bytes
    pub recv_buffer_size: usize,
    /// Maximum segment size used for segmentation and cwnd accounting
    pub mss: u16,
    /// Largest window in bytes; initial ssthresh and the cwnd ceiling
    pub max_window: u32,
    /// Algorithm given to new connections
    pub congestion_control: CongestionAlgorithm,
    /// Retransmission timeout before the first RTT sample
    pub initial_rto_ms: u64,
    pub min_rto_ms: u64,
    pub max_rto_ms: u64,
    /// Consecutive RTO expiries tolerated before the connection is aborted
    pub max_retries: u32,
    /// Time spent in TIME_WAIT (2 * MSL)
    pub time_wait_ms: u64,
}

impl Default for TcpConfig {
    fn default() -> Self {
        TcpConfig {
            max_connections: 10_000,
            send_buffer_size: 65_536,
            recv_buffer_size: 65_536,
            mss: 1460,
            max_window: 65_535,
            congestion_control: CongestionAlgorithm::Cubic,
            initial_rto_ms: 1_000,
            min_rto_ms: 200,
            max_rto_ms: 60_000,
            max_retries: 5,
            time_wait_ms: 60_000,
        }
    }
}

/// IP layer parameters
#[derive(Debug, Clone)]
pub struct IpConfig {
    /// Maximum number of routes
    pub route_capacity: usize,
    /// TTL written into outgoing headers
    pub default_ttl: u8,
}

impl Default for IpConfig {
    fn default() -> Self {
        IpConfig {
            route_capacity: 256,
            default_ttl: DEFAULT_TTL,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NatConfig {
    pub capacity: usize,
    /// Rules unused for longer than this are evicted on tick
    pub idle_timeout_ms: u64,
}

impl Default for NatConfig {
    fn default() -> Self {
        NatConfig {
            capacity: 1024,
            idle_timeout_ms: 300_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FirewallConfig {
    pub capacity: usize,
    /// Verdict for packets that match no rule
    pub default_action: FirewallAction,
}

impl Default for FirewallConfig {
    fn default() -> Self {
        FirewallConfig {
            capacity: 1024,
            default_action: FirewallAction::Deny,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UdpConfig {
    /// Datagrams queued per bound socket before new arrivals are dropped
    pub socket_queue_len: usize,
}

impl Default for UdpConfig {
    fn default() -> Self {
        UdpConfig {
            socket_queue_len: 64,
        }
    }
}
