//! TCP engine: connection registry, segment dispatch and timers
//!
//! The registry maps [`ConnectionId`] handles to connections and keeps a
//! tuple index for inbound demultiplexing. Lock order is registry before
//! connection, and segments are handed to the IP layer only after every
//! lock has been released.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::TcpConfig;
use crate::error::{NetError, Result};
use crate::network::ip::{Datagram, Disposition, IpLayer};
use crate::network::ipv4::protocol;
use crate::time::Clock;
use crate::transport::congestion::CongestionAlgorithm;
use crate::transport::connection::{reset_for, Connection};
use crate::transport::tcp::{TcpSegment, TcpState};

pub use crate::transport::connection::{ConnectionId, ConnectionInfo, ConnectionStats};

const UNSPECIFIED: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);

type ConnRef = Arc<Mutex<Connection>>;

#[derive(Default)]
struct Registry {
    connections: HashMap<ConnectionId, ConnRef>,
    /// (local, remote) of every connection not in `Closed`; listeners use
    /// an unspecified remote
    tuples: HashMap<(SocketAddrV4, SocketAddrV4), ConnectionId>,
    next_id: u64,
}

impl Registry {
    fn allocate_id(&mut self) -> ConnectionId {
        self.next_id += 1;
        ConnectionId(self.next_id)
    }

    fn get(&self, id: ConnectionId) -> Result<ConnRef> {
        self.connections.get(&id).cloned().ok_or(NetError::NotFound)
    }

    fn insert(&mut self, conn: Connection) {
        self.tuples.insert((conn.local, conn.remote), conn.id);
        self.connections.insert(conn.id, Arc::new(Mutex::new(conn)));
    }

    fn unindex(&mut self, id: ConnectionId, local: SocketAddrV4, remote: SocketAddrV4) {
        if self.tuples.get(&(local, remote)) == Some(&id) {
            self.tuples.remove(&(local, remote));
        }
    }

    /// Exact tuple, then a listener on the address, then a wildcard listener
    fn lookup(&self, local: SocketAddrV4, remote: SocketAddrV4) -> Option<ConnectionId> {
        self.tuples
            .get(&(local, remote))
            .or_else(|| self.tuples.get(&(local, UNSPECIFIED)))
            .or_else(|| {
                self.tuples
                    .get(&(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, local.port()), UNSPECIFIED))
            })
            .copied()
    }
}

pub struct TcpEngine {
    config: TcpConfig,
    ip: Arc<IpLayer>,
    clock: Arc<dyn Clock>,
    registry: Mutex<Registry>,
}

impl TcpEngine {
    pub fn new(config: TcpConfig, ip: Arc<IpLayer>, clock: Arc<dyn Clock>) -> Self {
        TcpEngine {
            config,
            ip,
            clock,
            registry: Mutex::new(Registry::default()),
        }
    }

    /// Open a passive connection on `local` (address may be 0.0.0.0)
    pub fn listen(&self, local: SocketAddrV4, backlog: usize) -> Result<ConnectionId> {
        if local.port() == 0 || backlog == 0 {
            return Err(NetError::InvalidArgument);
        }
        let mut registry = self.registry.lock();
        if registry.connections.len() >= self.config.max_connections {
            return Err(NetError::ResourceExhausted);
        }
        if registry.tuples.contains_key(&(local, UNSPECIFIED)) {
            return Err(NetError::InvalidArgument);
        }

        let id = registry.allocate_id();
        let mut conn = Connection::new(id, local, UNSPECIFIED, 0, &self.config);
        conn.backlog = backlog;
        conn.set_state(TcpState::Listen);
        registry.insert(conn);
        log::info!("{} listening on {} (backlog {})", id, local, backlog);
        Ok(id)
    }

    /// Active open; the SYN is sent before returning but the handshake
    /// completes asynchronously
    pub fn connect(&self, local: SocketAddrV4, remote: SocketAddrV4) -> Result<ConnectionId> {
        if local.port() == 0 || remote.port() == 0 || remote.ip().is_unspecified() {
            return Err(NetError::InvalidArgument);
        }
        let now = self.clock.now_ms();
        let mut out = Vec::new();
        let id = {
            let mut registry = self.registry.lock();
            if registry.connections.len() >= self.config.max_connections {
                return Err(NetError::ResourceExhausted);
            }
            if registry.tuples.contains_key(&(local, remote)) {
                return Err(NetError::InvalidArgument);
            }
            let id = registry.allocate_id();
            let mut conn = Connection::new(id, local, remote, initial_sequence(now, id), &self.config);
            conn.open_active(now, &mut out);
            registry.insert(conn);
            id
        };
        log::info!("{} connecting {} -> {}", id, local, remote);
        self.transmit(out);
        Ok(id)
    }

    /// Take the next established connection off a listener's queue
    pub fn accept(&self, listener: ConnectionId) -> Result<ConnectionId> {
        let registry = self.registry.lock();
        let listener_ref = registry.get(listener)?;
        let child = {
            let mut listener = listener_ref.lock();
            if listener.state != TcpState::Listen {
                return Err(NetError::StateError);
            }
            let child = listener.accept_queue.pop_front().ok_or(NetError::NotFound)?;
            listener.pending = listener.pending.saturating_sub(1);
            child
        };
        if let Ok(conn) = registry.get(child) {
            conn.lock().parent = None;
        }
        log::debug!("{} accepted {}", listener, child);
        Ok(child)
    }

    /// Queue `data` and transmit what the windows allow
    ///
    /// Either all of `data` is buffered or none of it.
    pub fn send(&self, id: ConnectionId, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Err(NetError::InvalidArgument);
        }
        let conn = self.registry.lock().get(id)?;
        let now = self.clock.now_ms();
        let mut out = Vec::new();
        let n = {
            let mut conn = conn.lock();
            if conn.state != TcpState::Established {
                return Err(NetError::StateError);
            }
            let n = conn.queue_send(data)?;
            conn.output(now, &mut out);
            n
        };
        self.transmit(out);
        Ok(n)
    }

    /// Copy received bytes into `buf`; 0 when nothing is buffered
    pub fn recv(&self, id: ConnectionId, buf: &mut [u8]) -> Result<usize> {
        let conn = self.registry.lock().get(id)?;
        let mut out = Vec::new();
        let n = {
            let mut conn = conn.lock();
            if conn.state != TcpState::Established {
                return Err(NetError::StateError);
            }
            conn.read(buf, &mut out)
        };
        self.transmit(out);
        Ok(n)
    }

    /// Graceful close: send FIN once buffered data has gone out
    pub fn shutdown(&self, id: ConnectionId) -> Result<()> {
        let conn = self.registry.lock().get(id)?;
        let now = self.clock.now_ms();
        let mut out = Vec::new();
        let change = {
            let mut conn = conn.lock();
            let before = conn.state;
            conn.shutdown(now, &mut out)?;
            StateChange::of(&conn, before)
        };
        self.apply(id, change);
        self.transmit(out);
        Ok(())
    }

    /// Remove the connection and release it
    ///
    /// A synchronized connection that has not finished gets a RST. Closing
    /// a listener also closes the children it has not handed out yet.
    pub fn close(&self, id: ConnectionId) -> Result<()> {
        let mut out = Vec::new();
        {
            let mut registry = self.registry.lock();
            let conn_ref = registry.connections.remove(&id).ok_or(NetError::NotFound)?;
            let (local, remote, parent, is_listener) = {
                let conn = conn_ref.lock();
                (conn.local, conn.remote, conn.parent, conn.state == TcpState::Listen)
            };
            registry.unindex(id, local, remote);

            if let Some(parent) = parent {
                detach_child(&registry, parent, id);
            }
            if is_listener {
                let children: Vec<ConnectionId> = registry
                    .connections
                    .iter()
                    .filter(|(_, c)| c.lock().parent == Some(id))
                    .map(|(child, _)| *child)
                    .collect();
                for child in children {
                    if let Some(child_ref) = registry.connections.remove(&child) {
                        let mut child_conn = child_ref.lock();
                        registry.unindex(child, child_conn.local, child_conn.remote);
                        child_conn.abort(&mut out);
                    }
                }
            }

            conn_ref.lock().abort(&mut out);
        }
        log::info!("{} closed", id);
        self.transmit(out);
        Ok(())
    }

    pub fn get_state(&self, id: ConnectionId) -> Result<TcpState> {
        let conn = self.registry.lock().get(id)?;
        let state = conn.lock().state;
        Ok(state)
    }

    pub fn set_congestion_control(&self, id: ConnectionId, algorithm: CongestionAlgorithm) -> Result<()> {
        let conn = self.registry.lock().get(id)?;
        conn.lock().cc.set_algorithm(algorithm);
        log::debug!("{} congestion control set to {}", id, algorithm);
        Ok(())
    }

    pub fn connection_info(&self, id: ConnectionId) -> Result<ConnectionInfo> {
        let conn = self.registry.lock().get(id)?;
        let info = conn.lock().info();
        Ok(info)
    }

    pub fn connection_count(&self) -> usize {
        self.registry.lock().connections.len()
    }

    /// Close every connection
    pub fn shutdown_all(&self) {
        let ids: Vec<ConnectionId> = self.registry.lock().connections.keys().copied().collect();
        for id in ids {
            // Children may already be gone with their listener
            let _ = self.close(id);
        }
    }

    /// Demultiplex a TCP datagram from the IP layer
    pub fn handle(&self, datagram: &Datagram) -> Result<()> {
        let segment = TcpSegment::parse(datagram).map_err(|err| {
            log::debug!("Dropping TCP segment from {}: {}", datagram.src, err);
            err
        })?;
        self.on_segment_received(&segment);
        Ok(())
    }

    /// Run a verified segment through the state machine of its connection
    pub fn on_segment_received(&self, seg: &TcpSegment) {
        let now = self.clock.now_ms();
        let local = SocketAddrV4::new(seg.dst, seg.header.dst_port);
        let remote = SocketAddrV4::new(seg.src, seg.header.src_port);
        let mut out = Vec::new();

        let target = {
            let mut registry = self.registry.lock();
            let found = registry
                .lookup(local, remote)
                .and_then(|id| registry.get(id).ok().map(|conn| (id, conn)));
            match found {
                Some((id, conn)) => {
                    let listening = conn.lock().state == TcpState::Listen;
                    if listening {
                        self.on_listen_segment(&mut registry, id, &conn, seg, now, &mut out);
                        None
                    } else {
                        Some((id, conn))
                    }
                }
                None => {
                    log::trace!("No connection for {} -> {}", remote, local);
                    if !seg.header.is_rst() {
                        out.push(reset_for(seg));
                    }
                    None
                }
            }
        };

        if let Some((id, conn)) = target {
            let change = {
                let mut conn = conn.lock();
                let before = conn.state;
                conn.on_segment(seg, now, &self.config, &mut out);
                StateChange::of(&conn, before)
            };
            self.apply(id, change);
        }
        self.transmit(out);
    }

    fn on_listen_segment(
        &self,
        registry: &mut Registry,
        listener_id: ConnectionId,
        listener: &ConnRef,
        seg: &TcpSegment,
        now: u64,
        out: &mut Vec<TcpSegment>,
    ) {
        let h = &seg.header;
        if h.is_rst() {
            return;
        }
        if h.is_ack() {
            out.push(reset_for(seg));
            return;
        }
        if !h.is_syn() {
            return;
        }

        let mut listener = listener.lock();
        if listener.pending >= listener.backlog {
            log::debug!("{} backlog full, dropping SYN from {}:{}", listener_id, seg.src, h.src_port);
            return;
        }
        if registry.connections.len() >= self.config.max_connections {
            log::warn!("Connection table full, dropping SYN from {}:{}", seg.src, h.src_port);
            return;
        }

        let id = registry.allocate_id();
        let local = SocketAddrV4::new(seg.dst, h.dst_port);
        let remote = SocketAddrV4::new(seg.src, h.src_port);
        let mut child = Connection::new(id, local, remote, initial_sequence(now, id), &self.config);
        child.parent = Some(listener_id);
        child.cc.set_algorithm(listener.cc.algorithm());
        child.open_passive(h, now, out);
        listener.pending += 1;
        registry.insert(child);
        log::debug!("{} spawned {} for {}", listener_id, id, remote);
    }

    /// Drive retransmission and TIME_WAIT timers
    pub fn tick(&self, now: u64) {
        let connections: Vec<(ConnectionId, ConnRef)> = self
            .registry
            .lock()
            .connections
            .iter()
            .map(|(id, conn)| (*id, conn.clone()))
            .collect();

        let mut out = Vec::new();
        for (id, conn) in connections {
            let change = {
                let mut conn = conn.lock();
                let before = conn.state;
                conn.on_tick(now, &self.config, &mut out);
                StateChange::of(&conn, before)
            };
            self.apply(id, change);
        }
        self.transmit(out);
    }

    /// Registry bookkeeping after a connection changed state
    fn apply(&self, id: ConnectionId, change: StateChange) {
        if change.before == change.after {
            return;
        }
        let mut registry = self.registry.lock();
        if change.after == TcpState::Closed {
            registry.unindex(id, change.local, change.remote);
            // Children nobody accepted yet disappear with their state
            if let Some(parent) = change.parent {
                registry.connections.remove(&id);
                detach_child(&registry, parent, id);
                log::debug!("{} dropped before accept", id);
            }
        } else if change.before == TcpState::SynReceived {
            // Handshake done (possibly with a FIN in the same segment)
            if let Some(parent) = change.parent {
                if let Ok(listener) = registry.get(parent) {
                    listener.lock().accept_queue.push_back(id);
                }
            }
        }
    }

    fn transmit(&self, segments: Vec<TcpSegment>) {
        for seg in segments {
            match self.ip.send(seg.src, seg.dst, protocol::TCP, &seg.to_bytes()) {
                Ok(Disposition::Sent) => {}
                Ok(Disposition::Filtered) => log::trace!("TCP segment to {} filtered", seg.dst),
                Err(err) => log::debug!("TCP segment to {} not sent: {}", seg.dst, err),
            }
        }
    }
}

struct StateChange {
    before: TcpState,
    after: TcpState,
    local: SocketAddrV4,
    remote: SocketAddrV4,
    parent: Option<ConnectionId>,
}

impl StateChange {
    fn of(conn: &Connection, before: TcpState) -> Self {
        StateChange {
            before,
            after: conn.state,
            local: conn.local,
            remote: conn.remote,
            parent: conn.parent,
        }
    }
}

fn detach_child(registry: &Registry, parent: ConnectionId, child: ConnectionId) {
    if let Ok(listener) = registry.get(parent) {
        let mut listener = listener.lock();
        listener.pending = listener.pending.saturating_sub(1);
        listener.accept_queue.retain(|queued| *queued != child);
    }
}

/// Clock-driven ISS (4 microsecond ticks), spread per connection
fn initial_sequence(now_ms: u64, id: ConnectionId) -> u32 {
    (now_ms as u32)
        .wrapping_mul(250)
        .wrapping_add((id.0 as u32).wrapping_mul(64_000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iface::driver::QueueDriver;
    use crate::network::firewall::{Firewall, FirewallAction};
    use crate::network::nat::NatTable;
    use crate::network::route::RouteTable;
    use crate::time::ManualClock;
    use crate::transport::tcp::{flags, TcpHeader};

    const A: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const B: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

    struct Host {
        tcp: TcpEngine,
        ip: Arc<IpLayer>,
        driver: Arc<QueueDriver>,
    }

    fn host(clock: &Arc<ManualClock>, config: TcpConfig) -> Host {
        let routes = Arc::new(RouteTable::new(4));
        routes
            .add_route(Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED, "lo")
            .unwrap();
        let nat = Arc::new(NatTable::new(4, 60_000, clock.clone()));
        let firewall = Arc::new(Firewall::new(4, FirewallAction::Allow));
        let driver = Arc::new(QueueDriver::new());
        let ip = Arc::new(IpLayer::new(routes, nat, firewall, driver.clone(), 64));
        let tcp = TcpEngine::new(config, ip.clone(), clock.clone());
        Host { tcp, ip, driver }
    }

    fn pair(config: TcpConfig) -> (Arc<ManualClock>, Host, Host) {
        let clock = Arc::new(ManualClock::new(1_000));
        let a = host(&clock, config.clone());
        let b = host(&clock, config);
        (clock, a, b)
    }

    /// Deliver queued packets both ways until the wire is quiet
    fn pump(a: &Host, b: &Host) {
        loop {
            let mut moved = false;
            for (from, to) in [(a, b), (b, a)] {
                for packet in from.driver.drain() {
                    moved = true;
                    if let Ok(Some(datagram)) = to.ip.recv(&packet.data) {
                        let _ = to.tcp.handle(&datagram);
                    }
                }
            }
            if !moved {
                break;
            }
        }
    }

    fn established(a: &Host, b: &Host) -> (ConnectionId, ConnectionId, ConnectionId) {
        let listener = b.tcp.listen(SocketAddrV4::new(B, 80), 4).unwrap();
        let client = a
            .tcp
            .connect(SocketAddrV4::new(A, 40000), SocketAddrV4::new(B, 80))
            .unwrap();
        pump(a, b);
        let server = b.tcp.accept(listener).unwrap();
        (listener, client, server)
    }

    #[test]
    fn test_connect_starts_in_syn_sent() {
        let (_, a, _b) = pair(TcpConfig::default());
        let id = a
            .tcp
            .connect(SocketAddrV4::new(A, 40000), SocketAddrV4::new(B, 80))
            .unwrap();
        assert_eq!(a.tcp.get_state(id), Ok(TcpState::SynSent));
        let info = a.tcp.connection_info(id).unwrap();
        assert_eq!(info.cwnd, 1);
        assert_eq!(info.ssthresh, 65_535);
        assert_eq!(info.congestion_algorithm, CongestionAlgorithm::Cubic);
        assert_eq!(a.tcp.send(id, b"early"), Err(NetError::StateError));
        assert_eq!(a.driver.len(), 1);
    }

    #[test]
    fn test_connect_argument_checks() {
        let (_, a, _b) = pair(TcpConfig::default());
        let local = SocketAddrV4::new(A, 40000);
        let remote = SocketAddrV4::new(B, 80);
        assert_eq!(
            a.tcp.connect(SocketAddrV4::new(A, 0), remote),
            Err(NetError::InvalidArgument)
        );
        assert_eq!(
            a.tcp.connect(local, SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 80)),
            Err(NetError::InvalidArgument)
        );
        a.tcp.connect(local, remote).unwrap();
        assert_eq!(a.tcp.connect(local, remote), Err(NetError::InvalidArgument));
    }

    #[test]
    fn test_three_way_handshake() {
        let (_, a, b) = pair(TcpConfig::default());
        let (listener, client, server) = established(&a, &b);
        assert_eq!(a.tcp.get_state(client), Ok(TcpState::Established));
        assert_eq!(b.tcp.get_state(server), Ok(TcpState::Established));
        assert_eq!(b.tcp.get_state(listener), Ok(TcpState::Listen));
        assert_eq!(b.tcp.accept(listener), Err(NetError::NotFound));

        let client_info = a.tcp.connection_info(client).unwrap();
        let server_info = b.tcp.connection_info(server).unwrap();
        assert_eq!(client_info.ack_num, server_info.seq_num);
        assert_eq!(server_info.ack_num, client_info.seq_num);
        assert_eq!(server_info.remote, SocketAddrV4::new(A, 40000));
    }

    #[test]
    fn test_data_transfer_both_ways() {
        let (_, a, b) = pair(TcpConfig::default());
        let (_, client, server) = established(&a, &b);

        assert_eq!(a.tcp.send(client, b"hello"), Ok(5));
        pump(&a, &b);
        let mut buf = [0u8; 16];
        assert_eq!(b.tcp.recv(server, &mut buf), Ok(5));
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(b.tcp.recv(server, &mut buf), Ok(0));

        b.tcp.send(server, b"world!").unwrap();
        pump(&a, &b);
        let mut small = [0u8; 4];
        assert_eq!(a.tcp.recv(client, &mut small), Ok(4));
        assert_eq!(&small, b"worl");
        assert_eq!(a.tcp.recv(client, &mut small), Ok(2));
        assert_eq!(&small[..2], b"d!");

        let info = a.tcp.connection_info(client).unwrap();
        assert_eq!(info.stats.bytes_sent, 5);
        assert_eq!(info.stats.bytes_received, 6);
        assert_eq!(info.send_buffer_used, 0);
        assert!(info.rtt > 0 || info.rto >= 200);
    }

    #[test]
    fn test_bulk_transfer_is_segmented() {
        let config = TcpConfig {
            mss: 500,
            ..TcpConfig::default()
        };
        let (_, a, b) = pair(config);
        let (_, client, server) = established(&a, &b);

        let data: Vec<u8> = (0..5_000u32).map(|i| i as u8).collect();
        a.tcp.send(client, &data).unwrap();
        pump(&a, &b);

        let mut received = vec![0u8; 6_000];
        let n = b.tcp.recv(server, &mut received).unwrap();
        assert_eq!(&received[..n], &data[..]);
        let info = a.tcp.connection_info(client).unwrap();
        assert_eq!(info.send_buffer_used, 0);
        assert!(info.cwnd > 1);
    }

    #[test]
    fn test_active_and_passive_close() {
        let (clock, a, b) = pair(TcpConfig::default());
        let (_, client, server) = established(&a, &b);

        a.tcp.shutdown(client).unwrap();
        assert_eq!(a.tcp.get_state(client), Ok(TcpState::FinWait1));
        pump(&a, &b);
        assert_eq!(a.tcp.get_state(client), Ok(TcpState::FinWait2));
        assert_eq!(b.tcp.get_state(server), Ok(TcpState::CloseWait));

        b.tcp.shutdown(server).unwrap();
        assert_eq!(b.tcp.get_state(server), Ok(TcpState::LastAck));
        pump(&a, &b);
        assert_eq!(b.tcp.get_state(server), Ok(TcpState::Closed));
        assert_eq!(a.tcp.get_state(client), Ok(TcpState::TimeWait));

        clock.advance(59_999);
        a.tcp.tick(clock.now_ms());
        assert_eq!(a.tcp.get_state(client), Ok(TcpState::TimeWait));
        clock.advance(1);
        a.tcp.tick(clock.now_ms());
        assert_eq!(a.tcp.get_state(client), Ok(TcpState::Closed));

        // The handle stays until close; the tuple is free again
        a.tcp.close(client).unwrap();
        a.tcp
            .connect(SocketAddrV4::new(A, 40000), SocketAddrV4::new(B, 80))
            .unwrap();
    }

    #[test]
    fn test_simultaneous_close() {
        let (_, a, b) = pair(TcpConfig::default());
        let (_, client, server) = established(&a, &b);
        a.tcp.shutdown(client).unwrap();
        b.tcp.shutdown(server).unwrap();
        pump(&a, &b);
        assert_eq!(a.tcp.get_state(client), Ok(TcpState::TimeWait));
        assert_eq!(b.tcp.get_state(server), Ok(TcpState::TimeWait));
    }

    #[test]
    fn test_shutdown_outside_open_states() {
        let (_, a, b) = pair(TcpConfig::default());
        let (listener, client, _) = established(&a, &b);
        a.tcp.shutdown(client).unwrap();
        assert_eq!(a.tcp.shutdown(client), Err(NetError::StateError));
        b.tcp.shutdown(listener).unwrap();
        assert_eq!(b.tcp.get_state(listener), Ok(TcpState::Closed));
        // A fresh listener may take the freed tuple
        b.tcp.listen(SocketAddrV4::new(B, 80), 1).unwrap();
    }

    #[test]
    fn test_close_resets_peer_and_is_not_repeatable() {
        let (_, a, b) = pair(TcpConfig::default());
        let (_, client, server) = established(&a, &b);
        let before = a.tcp.connection_count();

        a.tcp.close(client).unwrap();
        assert_eq!(a.tcp.connection_count(), before - 1);
        assert_eq!(a.tcp.close(client), Err(NetError::NotFound));
        assert_eq!(a.tcp.get_state(client), Err(NetError::NotFound));

        pump(&a, &b);
        assert_eq!(b.tcp.get_state(server), Ok(TcpState::Closed));
    }

    #[test]
    fn test_connect_to_closed_port_is_refused() {
        let (_, a, b) = pair(TcpConfig::default());
        let id = a
            .tcp
            .connect(SocketAddrV4::new(A, 40000), SocketAddrV4::new(B, 81))
            .unwrap();
        pump(&a, &b);
        assert_eq!(a.tcp.get_state(id), Ok(TcpState::Closed));
    }

    #[test]
    fn test_send_overflow_leaves_buffer_untouched() {
        let config = TcpConfig {
            send_buffer_size: 10,
            ..TcpConfig::default()
        };
        let (_, a, b) = pair(config);
        let (_, client, _) = established(&a, &b);

        assert_eq!(a.tcp.send(client, &[1u8; 8]), Ok(8));
        assert_eq!(a.tcp.send(client, &[2u8; 5]), Err(NetError::ResourceExhausted));
        let info = a.tcp.connection_info(client).unwrap();
        assert_eq!(info.send_buffer_used, 8);
        assert_eq!(info.stats.bytes_sent, 8);
        assert_eq!(a.tcp.send(client, &[]), Err(NetError::InvalidArgument));
    }

    #[test]
    fn test_rto_retransmits_then_aborts() {
        let config = TcpConfig {
            max_retries: 2,
            ..TcpConfig::default()
        };
        let (clock, a, _b) = pair(config);
        let id = a
            .tcp
            .connect(SocketAddrV4::new(A, 40000), SocketAddrV4::new(B, 80))
            .unwrap();
        a.driver.drain();

        clock.advance(1_000);
        a.tcp.tick(clock.now_ms());
        assert_eq!(a.driver.drain().len(), 1);
        let info = a.tcp.connection_info(id).unwrap();
        assert_eq!(info.rto, 2_000);
        assert_eq!(info.stats.retransmissions, 1);
        assert_eq!(info.cwnd, 1);

        clock.advance(2_000);
        a.tcp.tick(clock.now_ms());
        clock.advance(4_000);
        a.tcp.tick(clock.now_ms());
        let info = a.tcp.connection_info(id).unwrap();
        assert_eq!(info.state, TcpState::Closed);
        assert_eq!(info.stats.retransmissions, 2);
        assert_eq!(info.stats.timeouts, 3);
    }

    #[test]
    fn test_lost_data_is_retransmitted() {
        let (clock, a, b) = pair(TcpConfig::default());
        let (_, client, server) = established(&a, &b);

        a.tcp.send(client, b"lost").unwrap();
        a.driver.drain();
        let rto = a.tcp.connection_info(client).unwrap().rto;
        clock.advance(rto);
        a.tcp.tick(clock.now_ms());
        pump(&a, &b);

        let mut buf = [0u8; 8];
        assert_eq!(b.tcp.recv(server, &mut buf), Ok(4));
        assert_eq!(&buf[..4], b"lost");
        assert_eq!(a.tcp.connection_info(client).unwrap().send_buffer_used, 0);
    }

    #[test]
    fn test_burst_loss_recovers_after_one_timeout() {
        let config = TcpConfig {
            mss: 100,
            ..TcpConfig::default()
        };
        let (clock, a, b) = pair(config);
        let (_, client, server) = established(&a, &b);

        // Grow the congestion window past the burst size
        a.tcp.send(client, &[0u8; 3_000]).unwrap();
        pump(&a, &b);
        let mut buf = vec![0u8; 4_000];
        assert_eq!(b.tcp.recv(server, &mut buf), Ok(3_000));
        assert!(a.tcp.connection_info(client).unwrap().cwnd >= 8);

        let data: Vec<u8> = (0..800u32).map(|i| i as u8).collect();
        a.tcp.send(client, &data).unwrap();
        assert_eq!(a.driver.drain().len(), 8);

        let rto = a.tcp.connection_info(client).unwrap().rto;
        clock.advance(rto);
        a.tcp.tick(clock.now_ms());
        pump(&a, &b);

        assert_eq!(b.tcp.recv(server, &mut buf), Ok(800));
        assert_eq!(&buf[..800], &data[..]);
        let info = a.tcp.connection_info(client).unwrap();
        assert_eq!(info.send_buffer_used, 0);
        assert_eq!(info.snd_una, info.seq_num);
        assert_eq!(info.stats.timeouts, 1);
        assert_eq!(info.stats.retransmissions, 1);
        // No sample from resent data: the backed-off RTO stands
        assert_eq!(info.rto, 2 * rto);
    }

    #[test]
    fn test_simultaneous_open() {
        let (_, a, b) = pair(TcpConfig::default());
        let a_end = SocketAddrV4::new(A, 40000);
        let b_end = SocketAddrV4::new(B, 5000);
        let a_id = a.tcp.connect(a_end, b_end).unwrap();
        let b_id = b.tcp.connect(b_end, a_end).unwrap();

        for packet in a.driver.drain() {
            if let Ok(Some(datagram)) = b.ip.recv(&packet.data) {
                b.tcp.handle(&datagram).unwrap();
            }
        }
        assert_eq!(b.tcp.get_state(b_id), Ok(TcpState::SynReceived));

        pump(&a, &b);
        assert_eq!(a.tcp.get_state(a_id), Ok(TcpState::Established));
        assert_eq!(b.tcp.get_state(b_id), Ok(TcpState::Established));
        let a_info = a.tcp.connection_info(a_id).unwrap();
        let b_info = b.tcp.connection_info(b_id).unwrap();
        assert_eq!(a_info.ack_num, b_info.seq_num);
        assert_eq!(b_info.ack_num, a_info.seq_num);
    }

    #[test]
    fn test_syn_in_window_resets_connection() {
        let (_, a, b) = pair(TcpConfig::default());
        let (_, _, server) = established(&a, &b);
        let info = b.tcp.connection_info(server).unwrap();

        let syn = TcpSegment::new(
            A,
            B,
            TcpHeader::new(40000, 80, info.ack_num, 0, flags::SYN, 1000),
            Vec::new(),
        );
        b.tcp.on_segment_received(&syn);
        assert_eq!(b.tcp.get_state(server), Ok(TcpState::Closed));

        let sent = b.driver.drain();
        assert_eq!(sent.len(), 1);
        let datagram = a.ip.recv(&sent[0].data).unwrap().unwrap();
        assert!(TcpSegment::parse(&datagram).unwrap().header.is_rst());
    }

    #[test]
    fn test_time_wait_reacks_retransmitted_fin() {
        let (clock, a, b) = pair(TcpConfig::default());
        let (_, client, server) = established(&a, &b);
        a.tcp.shutdown(client).unwrap();
        pump(&a, &b);
        b.tcp.shutdown(server).unwrap();
        pump(&a, &b);
        assert_eq!(a.tcp.get_state(client), Ok(TcpState::TimeWait));
        let server_info = b.tcp.connection_info(server).unwrap();

        // The peer missed our last ACK and repeats its FIN
        clock.advance(40_000);
        let fin = TcpSegment::new(
            B,
            A,
            TcpHeader::new(
                80,
                40000,
                server_info.seq_num.wrapping_sub(1),
                server_info.ack_num,
                flags::FIN | flags::ACK,
                1000,
            ),
            Vec::new(),
        );
        a.tcp.on_segment_received(&fin);
        let sent = a.driver.drain();
        assert_eq!(sent.len(), 1);
        let datagram = b.ip.recv(&sent[0].data).unwrap().unwrap();
        let ack = TcpSegment::parse(&datagram).unwrap();
        assert!(ack.header.is_ack() && !ack.header.is_fin());
        assert_eq!(ack.header.ack_number, server_info.seq_num);

        // The 2*MSL timer restarted at the FIN
        clock.advance(20_000);
        a.tcp.tick(clock.now_ms());
        assert_eq!(a.tcp.get_state(client), Ok(TcpState::TimeWait));
        clock.advance(40_000);
        a.tcp.tick(clock.now_ms());
        assert_eq!(a.tcp.get_state(client), Ok(TcpState::Closed));
    }

    #[test]
    fn test_listen_checks() {
        let config = TcpConfig {
            max_connections: 1,
            ..TcpConfig::default()
        };
        let (_, _a, b) = pair(config);
        let local = SocketAddrV4::new(B, 80);
        assert_eq!(b.tcp.listen(SocketAddrV4::new(B, 0), 1), Err(NetError::InvalidArgument));
        assert_eq!(b.tcp.listen(local, 0), Err(NetError::InvalidArgument));
        let listener = b.tcp.listen(local, 1).unwrap();
        assert_eq!(b.tcp.listen(SocketAddrV4::new(B, 81), 1), Err(NetError::ResourceExhausted));
        assert_eq!(b.tcp.accept(listener), Err(NetError::NotFound));
    }

    #[test]
    fn test_accept_on_non_listener() {
        let (_, a, b) = pair(TcpConfig::default());
        let (_, client, _) = established(&a, &b);
        assert_eq!(a.tcp.accept(client), Err(NetError::StateError));
        assert_eq!(a.tcp.accept(ConnectionId(999)), Err(NetError::NotFound));
    }

    #[test]
    fn test_wildcard_listener_and_backlog() {
        let (_, a, b) = pair(TcpConfig::default());
        let listener = b
            .tcp
            .listen(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 80), 1)
            .unwrap();
        let first = a
            .tcp
            .connect(SocketAddrV4::new(A, 40000), SocketAddrV4::new(B, 80))
            .unwrap();
        let second = a
            .tcp
            .connect(SocketAddrV4::new(A, 40001), SocketAddrV4::new(B, 80))
            .unwrap();
        pump(&a, &b);

        assert_eq!(a.tcp.get_state(first), Ok(TcpState::Established));
        assert_eq!(a.tcp.get_state(second), Ok(TcpState::SynSent));
        let child = b.tcp.accept(listener).unwrap();
        assert_eq!(
            b.tcp.connection_info(child).unwrap().local,
            SocketAddrV4::new(B, 80)
        );
        assert_eq!(b.tcp.connection_count(), 2);
    }

    #[test]
    fn test_closing_listener_drops_unaccepted_children() {
        let (_, a, b) = pair(TcpConfig::default());
        let listener = b.tcp.listen(SocketAddrV4::new(B, 80), 4).unwrap();
        let client = a
            .tcp
            .connect(SocketAddrV4::new(A, 40000), SocketAddrV4::new(B, 80))
            .unwrap();
        pump(&a, &b);
        assert_eq!(b.tcp.connection_count(), 2);

        b.tcp.close(listener).unwrap();
        assert_eq!(b.tcp.connection_count(), 0);
        pump(&a, &b);
        assert_eq!(a.tcp.get_state(client), Ok(TcpState::Closed));
    }

    #[test]
    fn test_reset_child_is_removed_before_accept() {
        let (_, a, b) = pair(TcpConfig::default());
        let listener = b.tcp.listen(SocketAddrV4::new(B, 80), 4).unwrap();
        let client = a
            .tcp
            .connect(SocketAddrV4::new(A, 40000), SocketAddrV4::new(B, 80))
            .unwrap();
        pump(&a, &b);
        a.tcp.close(client).unwrap();
        pump(&a, &b);
        assert_eq!(b.tcp.connection_count(), 1);
        assert_eq!(b.tcp.accept(listener), Err(NetError::NotFound));
    }

    #[test]
    fn test_congestion_control_is_per_connection() {
        let (_, a, _b) = pair(TcpConfig::default());
        let id = a
            .tcp
            .connect(SocketAddrV4::new(A, 40000), SocketAddrV4::new(B, 80))
            .unwrap();
        a.tcp.set_congestion_control(id, CongestionAlgorithm::Bbr).unwrap();
        assert_eq!(
            a.tcp.connection_info(id).unwrap().congestion_algorithm,
            CongestionAlgorithm::Bbr
        );
        assert_eq!(
            a.tcp.set_congestion_control(ConnectionId(42), CongestionAlgorithm::Reno),
            Err(NetError::NotFound)
        );
    }

    #[test]
    fn test_shutdown_all_empties_registry() {
        let (_, a, b) = pair(TcpConfig::default());
        established(&a, &b);
        b.tcp.shutdown_all();
        assert_eq!(b.tcp.connection_count(), 0);
    }
}
