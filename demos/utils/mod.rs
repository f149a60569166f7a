//! Utility functions for the demos
//!
//! Interface configuration and stack setup shared by the TUN demos.

pub mod network;

pub use network::*;
