//! Network interface abstraction layer
//!
//! This module connects the protocol stack to the outside world:
//! - Driver trait and an in-memory queue driver
//! - TUN device driver
//! - The assembled stack that demultiplexes inbound packets

pub mod driver;
pub mod stack;
pub mod tun;

// Re-export commonly used items
pub use driver::{Driver, OutgoingPacket, QueueDriver};
pub use stack::NetStack;
pub use tun::TunDriver;
