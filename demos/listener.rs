//! A TCP echo server on a TUN interface
//!
//! This example creates a TUN device, gives the host side 10.0.0.254/24 and
//! runs the stack as 10.0.0.1. It answers pings and echoes back whatever a
//! TCP client sends to port 80:
//!
//! ```sh
//! cargo run --example listener
//! # in another shell
//! ping 10.0.0.1
//! nc 10.0.0.1 80
//! ```
//!
//! Note: Root/sudo privileges are required to create and configure the TUN device.

use std::net::SocketAddrV4;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tcpip_stack::iface::tun::TUN_MTU;
use tcpip_stack::{ConnectionId, TcpState};

mod utils;
use utils::network::tun_stack;

fn main() -> std::io::Result<()> {
    println!("Starting TCP echo listener...");
    let (tun, stack, local_addr) = tun_stack("tun0", "10.0.0.254/24", "10.0.0.1/24")?;
    println!("Stack address {} on {}", local_addr, tun.name());

    // Timers must run even when the device is quiet
    let stack = Arc::new(stack);
    let ticker = stack.clone();
    thread::spawn(move || loop {
        thread::sleep(Duration::from_millis(100));
        ticker.tick();
    });

    let tcp = stack.tcp();
    let listener = tcp
        .listen(SocketAddrV4::new(local_addr, 80), 16)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

    let mut clients: Vec<ConnectionId> = Vec::new();
    let mut packet_count = 0;
    let mut buf = [0u8; TUN_MTU];
    let mut data = [0u8; 4096];

    loop {
        // Receive packet from TUN interface
        let nbytes = tun.recv(&mut buf)?;
        packet_count += 1;
        if let Err(e) = stack.receive(&buf[..nbytes]) {
            eprintln!("[Packet #{}] dropped: {}", packet_count, e);
        }

        while let Ok(conn) = tcp.accept(listener) {
            if let Ok(info) = tcp.connection_info(conn) {
                println!("Accepted connection from {}", info.remote);
            }
            clients.push(conn);
        }

        clients.retain(|&conn| match tcp.get_state(conn) {
            Ok(TcpState::Established) => {
                while let Ok(n) = tcp.recv(conn, &mut data) {
                    if n == 0 {
                        break;
                    }
                    if let Err(e) = tcp.send(conn, &data[..n]) {
                        eprintln!("Echo failed: {}", e);
                    }
                }
                true
            }
            Ok(TcpState::CloseWait) => {
                let _ = tcp.shutdown(conn);
                true
            }
            Ok(TcpState::Closed) => {
                println!("Connection {} finished", conn);
                let _ = tcp.close(conn);
                false
            }
            Ok(_) => true,
            Err(_) => false,
        });
    }
}
