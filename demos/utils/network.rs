use std::io;
use std::net::Ipv4Addr;
use std::process::Command;
use std::sync::Arc;

use tcpip_stack::config::StackConfig;
use tcpip_stack::iface::TunDriver;
use tcpip_stack::{FirewallAction, MonotonicClock, NetStack};

fn run_ip(args: &[&str]) -> io::Result<()> {
    let status = Command::new("ip").args(args).status()?;
    if !status.success() {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!("`ip {}` failed", args.join(" ")),
        ));
    }
    Ok(())
}

/// Assign `ip_cidr` to the host side of the device and bring it up
pub fn configure_interface(iface_name: &str, ip_cidr: &str) -> io::Result<()> {
    run_ip(&["addr", "add", ip_cidr, "dev", iface_name])?;
    run_ip(&["link", "set", "up", "dev", iface_name])?;

    println!(
        "Interface {} configured with IP {} and brought up",
        iface_name, ip_cidr
    );
    Ok(())
}

/// Split "a.b.c.d/len" into address and netmask
pub fn parse_ip_cidr(ip_cidr: &str) -> Option<(Ipv4Addr, Ipv4Addr)> {
    let (addr, prefix) = ip_cidr.split_once('/')?;
    let addr: Ipv4Addr = addr.parse().ok()?;
    let prefix: u32 = prefix.parse().ok()?;
    if prefix > 32 {
        return None;
    }
    let mask = u32::MAX.checked_shl(32 - prefix).unwrap_or(0);
    Some((addr, Ipv4Addr::from(mask)))
}

/// Open `tun_name`, configure the host side and build a stack that owns
/// `local_cidr` on it
///
/// The demos accept everything: the default firewall policy is opened up.
pub fn tun_stack(tun_name: &str, host_cidr: &str, local_cidr: &str) -> io::Result<(Arc<TunDriver>, NetStack, Ipv4Addr)> {
    let invalid = || io::Error::new(io::ErrorKind::InvalidInput, "bad CIDR");
    let (local_addr, netmask) = parse_ip_cidr(local_cidr).ok_or_else(invalid)?;

    let tun = Arc::new(TunDriver::open(tun_name)?);
    configure_interface(tun.name(), host_cidr)?;

    let mut config = StackConfig::default();
    config.firewall.default_action = FirewallAction::Allow;
    let stack = NetStack::new(config, tun.clone(), Arc::new(MonotonicClock::new()));

    let network = Ipv4Addr::from(u32::from(local_addr) & u32::from(netmask));
    stack
        .routes()
        .add_route(network, netmask, Ipv4Addr::UNSPECIFIED, tun.name())
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    Ok((tun, stack, local_addr))
}
