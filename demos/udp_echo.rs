//! A UDP echo server on a TUN interface
//!
//! ```sh
//! cargo run --example udp_echo
//! # in another shell
//! nc -u 10.0.0.1 7
//! ```
//!
//! Note: Root/sudo privileges are required to create and configure the TUN device.

use std::io::{Error, ErrorKind, Result};

use tcpip_stack::iface::tun::TUN_MTU;

mod utils;
use utils::network::tun_stack;

fn main() -> Result<()> {
    let port = 7;
    let (tun, stack, _) = tun_stack("tun0", "10.0.0.254/24", "10.0.0.1/24")?;
    let udp = stack.udp();
    udp.bind(port).map_err(|e| Error::new(ErrorKind::Other, e))?;
    println!("UDP echo listening on port {}", port);

    let mut buf = [0u8; TUN_MTU];
    loop {
        let nbytes = tun.recv(&mut buf)?;
        if let Err(e) = stack.receive(&buf[..nbytes]) {
            eprintln!("Packet dropped: {}", e);
        }

        while let Ok(Some(datagram)) = udp.recv_from(port) {
            println!("{} bytes from {}", datagram.payload.len(), datagram.src);
            if let Err(e) = udp.send(datagram.dst, datagram.src, &datagram.payload) {
                eprintln!("Failed to send response: {}", e);
            }
        }
    }
}
