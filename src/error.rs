//! Error type shared by every layer of the stack

use std::fmt;
use std::io;

/// Errors returned by stack operations
///
/// None of these are fatal: every variant describes a rejected command or a
/// dropped packet, and the caller may retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetError {
    /// Malformed input: zero length, bad port, truncated or invalid packet
    InvalidArgument,
    /// Operation not valid in the connection's current state
    StateError,
    /// Table or buffer full
    ResourceExhausted,
    /// Route, NAT rule, firewall rule, socket or connection absent
    NotFound,
    /// IPv4 header (or ICMP message) failed checksum verification
    ChecksumMismatch,
    /// The driver refused to transmit the packet
    Driver(io::ErrorKind),
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetError::InvalidArgument => write!(f, "invalid argument"),
            NetError::StateError => write!(f, "operation not valid in current connection state"),
            NetError::ResourceExhausted => write!(f, "resource exhausted"),
            NetError::NotFound => write!(f, "not found"),
            NetError::ChecksumMismatch => write!(f, "checksum mismatch"),
            NetError::Driver(kind) => write!(f, "driver transmit failed: {}", kind),
        }
    }
}

impl std::error::Error for NetError {}

impl From<io::Error> for NetError {
    fn from(err: io::Error) -> Self {
        NetError::Driver(err.kind())
    }
}

pub type Result<T> = std::result::Result<T, NetError>;
