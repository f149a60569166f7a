//! Per-connection TCP state
//!
//! A [`Connection`] owns the sequence space bookkeeping, buffers, timers
//! and congestion state of one flow and implements the RFC 793 segment
//! arrival rules for every state except `Listen` (passive opens need the
//! registry and are handled by the engine). Outgoing segments are pushed
//! onto a caller-supplied vector so that nothing is transmitted while the
//! connection lock is held.

use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddrV4;

use crate::config::TcpConfig;
use crate::error::{NetError, Result};
use crate::transport::congestion::{CongestionAlgorithm, CongestionControl};
use crate::transport::tcp::{flags, seq_ge, seq_gt, seq_in_window, seq_le, seq_lt, TcpHeader, TcpSegment, TcpState};

/// Duplicate ACKs that trigger a fast retransmit
const DUP_ACK_THRESHOLD: u32 = 3;
/// Clock granularity G from RFC 6298
const CLOCK_GRANULARITY_MS: u64 = 1;

/// Opaque handle to a connection in a [`crate::TcpEngine`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub(crate) u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tcp#{}", self.0)
    }
}

/// Bounded byte FIFO
#[derive(Debug, Clone)]
pub struct SocketBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl SocketBuffer {
    pub fn new(capacity: usize) -> Self {
        SocketBuffer {
            data: Vec::new(),
            capacity,
        }
    }

    pub fn used(&self) -> usize {
        self.data.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn free(&self) -> usize {
        self.capacity - self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append all of `bytes` or nothing
    pub fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.free() {
            return Err(NetError::ResourceExhausted);
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Append as much of `bytes` as fits, returning the count taken
    pub fn write_partial(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.free());
        self.data.extend_from_slice(&bytes[..n]);
        n
    }

    /// Move up to `buf.len()` bytes out of the front of the buffer
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.data.len());
        buf[..n].copy_from_slice(&self.data[..n]);
        self.data.drain(..n);
        n
    }

    /// Bytes at `offset..offset + len`, clipped to what is buffered
    pub fn peek(&self, offset: usize, len: usize) -> &[u8] {
        let start = offset.min(self.data.len());
        let end = offset.saturating_add(len).min(self.data.len());
        &self.data[start..end]
    }

    /// Drop up to `n` bytes from the front
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.data.len());
        self.data.drain(..n);
    }
}

/// Per-connection counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub retransmissions: u64,
    pub timeouts: u64,
}

/// Point-in-time copy of a connection's fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub local: SocketAddrV4,
    pub remote: SocketAddrV4,
    pub state: TcpState,
    pub seq_num: u32,
    pub snd_una: u32,
    pub ack_num: u32,
    pub window_size: u16,
    pub remote_window: u32,
    pub cwnd: u32,
    pub ssthresh: u32,
    pub rtt: u64,
    pub rttvar: u64,
    pub rto: u64,
    pub congestion_algorithm: CongestionAlgorithm,
    pub send_buffer_used: usize,
    pub send_buffer_capacity: usize,
    pub recv_buffer_used: usize,
    pub recv_buffer_capacity: usize,
    pub stats: ConnectionStats,
}

#[derive(Debug)]
pub(crate) struct Connection {
    pub id: ConnectionId,
    pub local: SocketAddrV4,
    pub remote: SocketAddrV4,
    pub state: TcpState,

    /// SND.NXT
    pub seq_num: u32,
    /// SND.UNA
    pub snd_una: u32,
    /// Highest sequence number sent; SND.NXT drops below it after an RTO
    snd_max: u32,
    /// RCV.NXT
    pub ack_num: u32,
    pub iss: u32,
    pub irs: u32,
    /// Last window advertised to the peer
    pub window_size: u16,
    pub remote_window: u32,

    pub cc: CongestionControl,
    pub mss: u16,
    /// Smoothed RTT, 0 until the first sample
    pub rtt: u64,
    pub rttvar: u64,
    pub rto: u64,

    pub send_buffer: SocketBuffer,
    pub recv_buffer: SocketBuffer,
    pub stats: ConnectionStats,

    /// Consecutive RTO expiries without progress
    pub retries: u32,
    dup_acks: u32,
    rto_deadline: Option<u64>,
    /// (sequence number that completes the sample, send time)
    rtt_sample: Option<(u32, u64)>,
    time_wait_deadline: Option<u64>,
    /// FIN requested by shutdown but not yet sent
    fin_pending: bool,
    /// Sequence number our FIN occupies
    fin_seq: Option<u32>,

    /// Listener that spawned this connection, until it is accepted
    pub parent: Option<ConnectionId>,
    pub backlog: usize,
    /// Children of a listener not yet accepted, half-open or queued
    pub pending: usize,
    pub accept_queue: VecDeque<ConnectionId>,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        local: SocketAddrV4,
        remote: SocketAddrV4,
        iss: u32,
        config: &TcpConfig,
    ) -> Self {
        Connection {
            id,
            local,
            remote,
            state: TcpState::Closed,
            seq_num: iss,
            snd_una: iss,
            snd_max: iss,
            ack_num: 0,
            iss,
            irs: 0,
            window_size: 0,
            remote_window: 0,
            cc: CongestionControl::new(config.congestion_control, config.mss, config.max_window),
            mss: config.mss,
            rtt: 0,
            rttvar: 0,
            rto: config.initial_rto_ms,
            send_buffer: SocketBuffer::new(config.send_buffer_size),
            recv_buffer: SocketBuffer::new(config.recv_buffer_size),
            stats: ConnectionStats::default(),
            retries: 0,
            dup_acks: 0,
            rto_deadline: None,
            rtt_sample: None,
            time_wait_deadline: None,
            fin_pending: false,
            fin_seq: None,
            parent: None,
            backlog: 0,
            pending: 0,
            accept_queue: VecDeque::new(),
        }
    }

    pub fn set_state(&mut self, state: TcpState) {
        if self.state != state {
            log::debug!("{} {} -> {}: {:?} -> {:?}", self.id, self.local, self.remote, self.state, state);
            self.state = state;
        }
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            local: self.local,
            remote: self.remote,
            state: self.state,
            seq_num: self.seq_num,
            snd_una: self.snd_una,
            ack_num: self.ack_num,
            window_size: self.window_size,
            remote_window: self.remote_window,
            cwnd: self.cc.cwnd(),
            ssthresh: self.cc.ssthresh(),
            rtt: self.rtt,
            rttvar: self.rttvar,
            rto: self.rto,
            congestion_algorithm: self.cc.algorithm(),
            send_buffer_used: self.send_buffer.used(),
            send_buffer_capacity: self.send_buffer.capacity(),
            recv_buffer_used: self.recv_buffer.used(),
            recv_buffer_capacity: self.recv_buffer.capacity(),
            stats: self.stats,
        }
    }

    /// Receive window derived from free buffer space
    fn receive_window(&self) -> u16 {
        self.recv_buffer.free().min(u16::MAX as usize) as u16
    }

    fn segment(&mut self, seq: u32, flag_bits: u8, payload: Vec<u8>) -> TcpSegment {
        let window = self.receive_window();
        self.window_size = window;
        let ack = if flag_bits & flags::ACK != 0 { self.ack_num } else { 0 };
        TcpSegment::new(
            *self.local.ip(),
            *self.remote.ip(),
            TcpHeader::new(self.local.port(), self.remote.port(), seq, ack, flag_bits, window),
            payload,
        )
    }

    fn send_ack(&mut self, out: &mut Vec<TcpSegment>) {
        let seg = self.segment(self.seq_num, flags::ACK, Vec::new());
        out.push(seg);
    }

    fn arm_timer(&mut self, now: u64) {
        if self.rto_deadline.is_none() {
            self.rto_deadline = Some(now + self.rto);
        }
    }

    fn has_outstanding(&self) -> bool {
        self.snd_max != self.snd_una
    }

    fn advance_seq(&mut self, len: u32) {
        self.seq_num = self.seq_num.wrapping_add(len);
        if seq_gt(self.seq_num, self.snd_max) {
            self.snd_max = self.seq_num;
        }
    }

    fn syn_unacked(&self) -> bool {
        self.snd_una == self.iss && self.seq_num != self.iss
    }

    fn fin_acked(&self) -> bool {
        self.fin_seq.map_or(false, |fin| seq_gt(self.snd_una, fin))
    }

    /// Emit the initial SYN (active open)
    pub fn open_active(&mut self, now: u64, out: &mut Vec<TcpSegment>) {
        self.set_state(TcpState::SynSent);
        let seg = self.segment(self.iss, flags::SYN, Vec::new());
        out.push(seg);
        self.seq_num = self.iss;
        self.advance_seq(1);
        self.rtt_sample = Some((self.seq_num, now));
        self.arm_timer(now);
    }

    /// Answer a SYN with SYN-ACK (passive or simultaneous open)
    pub fn open_passive(&mut self, syn: &TcpHeader, now: u64, out: &mut Vec<TcpSegment>) {
        self.irs = syn.seq_number;
        self.ack_num = syn.seq_number.wrapping_add(1);
        self.remote_window = u32::from(syn.window_size);
        self.set_state(TcpState::SynReceived);
        let seg = self.segment(self.iss, flags::SYN | flags::ACK, Vec::new());
        out.push(seg);
        self.seq_num = self.iss;
        self.advance_seq(1);
        self.rtt_sample = Some((self.seq_num, now));
        self.arm_timer(now);
    }

    /// Queue application data; all or nothing
    pub fn queue_send(&mut self, data: &[u8]) -> Result<usize> {
        self.send_buffer.write_all(data)?;
        self.stats.bytes_sent += data.len() as u64;
        self.stats.packets_sent += 1;
        Ok(data.len())
    }

    /// Read received data, acking a reopened window
    pub fn read(&mut self, buf: &mut [u8], out: &mut Vec<TcpSegment>) -> usize {
        let n = self.recv_buffer.read(buf);
        if n > 0 {
            self.stats.bytes_received += n as u64;
            self.stats.packets_received += 1;
            if self.window_size < self.mss && self.receive_window() >= self.mss {
                self.send_ack(out);
            }
        }
        n
    }

    /// Start a graceful close
    pub fn shutdown(&mut self, now: u64, out: &mut Vec<TcpSegment>) -> Result<()> {
        match self.state {
            TcpState::Listen | TcpState::SynSent => {
                self.set_state(TcpState::Closed);
                self.rto_deadline = None;
            }
            TcpState::Established | TcpState::SynReceived => {
                self.fin_pending = true;
                self.set_state(TcpState::FinWait1);
                self.output(now, out);
            }
            TcpState::CloseWait => {
                self.fin_pending = true;
                self.set_state(TcpState::LastAck);
                self.output(now, out);
            }
            _ => return Err(NetError::StateError),
        }
        Ok(())
    }

    /// RST if the peer may still hold state for us, then `Closed`
    pub fn abort(&mut self, out: &mut Vec<TcpSegment>) {
        if self.state.is_synchronized() && self.state != TcpState::TimeWait {
            let seg = self.segment(self.seq_num, flags::RST | flags::ACK, Vec::new());
            out.push(seg);
        }
        self.enter_closed();
    }

    fn enter_closed(&mut self) {
        self.set_state(TcpState::Closed);
        self.rto_deadline = None;
        self.time_wait_deadline = None;
        self.fin_pending = false;
    }

    fn enter_time_wait(&mut self, now: u64, config: &TcpConfig) {
        self.set_state(TcpState::TimeWait);
        self.rto_deadline = None;
        self.time_wait_deadline = Some(now + config.time_wait_ms);
    }

    /// Transmit buffered data the windows allow, then a pending FIN
    pub fn output(&mut self, now: u64, out: &mut Vec<TcpSegment>) {
        if self.syn_unacked() {
            return;
        }
        let window = self.cc.window_bytes().min(self.remote_window) as usize;
        let mss = usize::from(self.mss);
        loop {
            let offset = self.seq_num.wrapping_sub(self.snd_una) as usize;
            let unsent = self.send_buffer.used().saturating_sub(offset);
            if unsent == 0 || offset >= window {
                break;
            }
            let len = unsent.min(mss).min(window - offset);
            let payload = self.send_buffer.peek(offset, len).to_vec();
            let seg = self.segment(self.seq_num, flags::ACK | flags::PSH, payload);
            out.push(seg);
            // Karn: only never-sent data is timed
            let fresh = seq_ge(self.seq_num, self.snd_max);
            self.advance_seq(len as u32);
            if fresh && self.rtt_sample.is_none() {
                self.rtt_sample = Some((self.seq_num, now));
            }
            self.arm_timer(now);
        }

        let all_sent = self.seq_num.wrapping_sub(self.snd_una) as usize >= self.send_buffer.used();
        if self.fin_pending && all_sent {
            self.fin_pending = false;
            self.fin_seq = Some(self.seq_num);
            let seg = self.segment(self.seq_num, flags::FIN | flags::ACK, Vec::new());
            out.push(seg);
            self.advance_seq(1);
            self.arm_timer(now);
        }
    }

    /// Resend the oldest unacknowledged segment
    fn retransmit(&mut self, now: u64, out: &mut Vec<TcpSegment>) {
        // Karn: no RTT sample from retransmitted data
        self.rtt_sample = None;
        self.stats.retransmissions += 1;

        let seg = if self.syn_unacked() {
            let syn_flags = match self.state {
                TcpState::SynSent => flags::SYN,
                _ => flags::SYN | flags::ACK,
            };
            self.segment(self.iss, syn_flags, Vec::new())
        } else if !self.send_buffer.is_empty() {
            let payload = self.send_buffer.peek(0, usize::from(self.mss)).to_vec();
            self.segment(self.snd_una, flags::ACK | flags::PSH, payload)
        } else if let Some(fin) = self.fin_seq {
            self.segment(fin, flags::FIN | flags::ACK, Vec::new())
        } else {
            return;
        };
        log::trace!("{} retransmit seq {}", self.id, seg.header.seq_number);
        out.push(seg);
        self.rto_deadline = Some(now + self.rto);
    }

    fn update_rtt(&mut self, sample: u64, config: &TcpConfig) {
        if self.rtt == 0 {
            self.rtt = sample.max(1);
            self.rttvar = sample / 2;
        } else {
            let err = self.rtt.abs_diff(sample);
            self.rttvar = (3 * self.rttvar + err) / 4;
            self.rtt = (7 * self.rtt + sample) / 8;
        }
        self.rto = (self.rtt + CLOCK_GRANULARITY_MS.max(4 * self.rttvar))
            .clamp(config.min_rto_ms, config.max_rto_ms);
    }

    /// Retransmission and TIME_WAIT timers
    pub fn on_tick(&mut self, now: u64, config: &TcpConfig, out: &mut Vec<TcpSegment>) {
        if let Some(deadline) = self.time_wait_deadline {
            if now >= deadline {
                log::debug!("{} TIME_WAIT expired", self.id);
                self.enter_closed();
            }
            return;
        }

        let Some(deadline) = self.rto_deadline else {
            return;
        };
        if now < deadline || !self.has_outstanding() {
            return;
        }

        self.stats.timeouts += 1;
        if self.retries >= config.max_retries {
            log::warn!("{} {} -> {} aborted after {} retries", self.id, self.local, self.remote, self.retries);
            self.abort(out);
            return;
        }
        self.retries += 1;
        self.cc.on_timeout();
        self.rto = (self.rto * 2).min(config.max_rto_ms);
        if self.syn_unacked() {
            self.retransmit(now, out);
        } else {
            self.resend_flight(now, out);
        }
    }

    /// Go back to SND.UNA and resend the lost flight as slow start reopens
    fn resend_flight(&mut self, now: u64, out: &mut Vec<TcpSegment>) {
        self.rtt_sample = None;
        self.stats.retransmissions += 1;
        self.seq_num = self.snd_una;
        if self.fin_seq.is_some() && !self.fin_acked() {
            self.fin_pending = true;
        }
        self.rto_deadline = None;
        log::trace!("{} resending from seq {}", self.id, self.snd_una);
        self.output(now, out);
        if self.has_outstanding() {
            self.arm_timer(now);
        }
    }

    /// RFC 793 acceptability test against the receive window
    fn acceptable(&self, seg: &TcpSegment) -> bool {
        let seq = seg.header.seq_number;
        let len = seg.seq_len();
        let wnd = u32::from(self.receive_window());
        match (len, wnd) {
            (0, 0) => seq == self.ack_num,
            (0, _) => seq_in_window(seq, self.ack_num, wnd),
            (_, 0) => false,
            (_, _) => {
                seq_in_window(seq, self.ack_num, wnd)
                    || seq_in_window(seq.wrapping_add(len - 1), self.ack_num, wnd)
            }
        }
    }

    /// Process an arriving segment in any state but `Listen` and `Closed`
    pub fn on_segment(&mut self, seg: &TcpSegment, now: u64, config: &TcpConfig, out: &mut Vec<TcpSegment>) {
        match self.state {
            TcpState::SynSent => self.on_segment_syn_sent(seg, now, config, out),
            TcpState::Listen | TcpState::Closed => {}
            _ => self.on_segment_synchronized(seg, now, config, out),
        }
    }

    fn on_segment_syn_sent(&mut self, seg: &TcpSegment, now: u64, config: &TcpConfig, out: &mut Vec<TcpSegment>) {
        let h = &seg.header;
        let ack_ok = h.is_ack() && seq_gt(h.ack_number, self.iss) && seq_le(h.ack_number, self.seq_num);
        if h.is_ack() && !ack_ok {
            if !h.is_rst() {
                out.push(reset_for(seg));
            }
            return;
        }
        if h.is_rst() {
            if ack_ok {
                log::info!("{} connection to {} refused", self.id, self.remote);
                self.enter_closed();
            }
            return;
        }
        if !h.is_syn() {
            return;
        }

        if ack_ok {
            self.irs = h.seq_number;
            self.ack_num = h.seq_number.wrapping_add(1);
            self.remote_window = u32::from(h.window_size);
            self.process_ack(h.ack_number, now, config);
            self.set_state(TcpState::Established);
            self.send_ack(out);
            self.output(now, out);
        } else {
            // Simultaneous open
            self.open_passive(h, now, out);
        }
    }

    fn on_segment_synchronized(
        &mut self,
        seg: &TcpSegment,
        now: u64,
        config: &TcpConfig,
        out: &mut Vec<TcpSegment>,
    ) {
        let h = &seg.header;

        if self.state == TcpState::TimeWait {
            if h.is_fin() && !h.is_rst() {
                self.send_ack(out);
                self.time_wait_deadline = Some(now + config.time_wait_ms);
            }
            return;
        }

        if !self.acceptable(seg) {
            if !h.is_rst() {
                self.send_ack(out);
            }
            return;
        }

        if h.is_rst() {
            log::info!("{} reset by {}", self.id, self.remote);
            self.enter_closed();
            return;
        }

        if h.is_syn() {
            out.push(self.segment(self.seq_num, flags::RST, Vec::new()));
            self.enter_closed();
            return;
        }

        if !h.is_ack() {
            return;
        }

        if self.state == TcpState::SynReceived {
            if seq_gt(h.ack_number, self.snd_una) && seq_le(h.ack_number, self.snd_max) {
                self.process_ack(h.ack_number, now, config);
                self.set_state(TcpState::Established);
            } else {
                out.push(reset_for(seg));
                return;
            }
        }

        if seq_gt(h.ack_number, self.snd_max) {
            // Acks something never sent
            self.send_ack(out);
            return;
        }

        if seq_gt(h.ack_number, self.snd_una) {
            self.process_ack(h.ack_number, now, config);
        } else if h.ack_number == self.snd_una
            && seg.payload.is_empty()
            && !h.is_fin()
            && self.has_outstanding()
            && u32::from(h.window_size) == self.remote_window
        {
            self.dup_acks += 1;
            if self.dup_acks == DUP_ACK_THRESHOLD {
                log::debug!("{} fast retransmit at {}", self.id, self.snd_una);
                self.cc.on_loss();
                self.retransmit(now, out);
            }
        }
        self.remote_window = u32::from(h.window_size);

        if self.fin_acked() {
            match self.state {
                TcpState::FinWait1 => self.set_state(TcpState::FinWait2),
                TcpState::Closing => self.enter_time_wait(now, config),
                TcpState::LastAck => {
                    self.enter_closed();
                    return;
                }
                _ => {}
            }
        }

        let mut need_ack = false;
        let mut seq = h.seq_number;
        if !seg.payload.is_empty()
            && matches!(self.state, TcpState::Established | TcpState::FinWait1 | TcpState::FinWait2)
        {
            need_ack = true;
            let end = seq.wrapping_add(seg.payload.len() as u32);
            if seq_le(seq, self.ack_num) && seq_gt(end, self.ack_num) {
                let skip = self.ack_num.wrapping_sub(seq) as usize;
                let taken = self.recv_buffer.write_partial(&seg.payload[skip..]);
                self.ack_num = self.ack_num.wrapping_add(taken as u32);
                seq = seq.wrapping_add((skip + taken) as u32);
                log::trace!("{} received {} bytes", self.id, taken);
            }
        } else {
            seq = seq.wrapping_add(seg.payload.len() as u32);
        }

        // FIN counts only once everything before it has arrived
        if h.is_fin() && seq == self.ack_num {
            self.ack_num = self.ack_num.wrapping_add(1);
            need_ack = true;
            match self.state {
                TcpState::Established => self.set_state(TcpState::CloseWait),
                TcpState::FinWait1 => self.set_state(TcpState::Closing),
                TcpState::FinWait2 => self.enter_time_wait(now, config),
                _ => {}
            }
        } else if h.is_fin() && seq_lt(seq, self.ack_num) {
            // Retransmitted FIN
            need_ack = true;
        }

        if need_ack {
            self.send_ack(out);
        }
        self.output(now, out);
    }

    /// SND.UNA advances to `ack`
    fn process_ack(&mut self, ack: u32, now: u64, config: &TcpConfig) {
        let mut acked = ack.wrapping_sub(self.snd_una);
        if self.syn_unacked() {
            acked -= 1;
        }
        if let Some(fin) = self.fin_seq {
            if seq_gt(ack, fin) && seq_le(self.snd_una, fin) {
                acked -= 1;
            }
        }
        self.send_buffer.consume(acked as usize);
        self.snd_una = ack;
        // Data sent before an RTO rewind may still be acknowledged
        if seq_gt(ack, self.seq_num) {
            self.seq_num = ack;
        }
        if self.fin_acked() {
            self.fin_pending = false;
        }
        self.retries = 0;
        self.dup_acks = 0;

        if let Some((target, sent_at)) = self.rtt_sample {
            if seq_ge(ack, target) {
                self.update_rtt(now.saturating_sub(sent_at), config);
                self.rtt_sample = None;
            }
        }
        if acked > 0 {
            self.cc.on_ack(acked, now);
        }

        self.rto_deadline = None;
        if self.has_outstanding() {
            self.arm_timer(now);
        }
    }
}

/// RST answering `seg` when no connection state applies (RFC 793 "reset
/// generation")
pub(crate) fn reset_for(seg: &TcpSegment) -> TcpSegment {
    let h = &seg.header;
    let header = if h.is_ack() {
        TcpHeader::new(h.dst_port, h.src_port, h.ack_number, 0, flags::RST, 0)
    } else {
        TcpHeader::new(
            h.dst_port,
            h.src_port,
            0,
            h.seq_number.wrapping_add(seg.seq_len()),
            flags::RST | flags::ACK,
            0,
        )
    };
    TcpSegment::new(seg.dst, seg.src, header, Vec::new())
}
