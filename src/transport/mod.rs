//! Transport layer protocols implementation
//!
//! This module contains implementations for transport layer protocols:
//! - TCP: wire format, per-connection state machine, congestion control
//!   and the engine that owns every connection
//! - UDP: User Datagram Protocol with bound receive queues

pub mod congestion;
pub mod connection;
pub mod engine;
pub mod tcp;
pub mod udp;

// Re-export commonly used items
pub use congestion::CongestionAlgorithm;
pub use engine::{ConnectionId, ConnectionInfo, TcpEngine};
pub use tcp::{TcpHeader, TcpState};
pub use udp::{UdpDatagram, UdpHandler, UdpHeader};
