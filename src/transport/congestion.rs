//! TCP congestion control
//!
//! `cwnd` and `ssthresh` are counted in segments. Every algorithm shares
//! slow start and the loss/timeout reactions; the variants differ only in
//! how fast the window grows during congestion avoidance.

use std::fmt;

/// Congestion control algorithm selectable per connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CongestionAlgorithm {
    Reno,
    NewReno,
    #[default]
    Cubic,
    Bbr,
    Vegas,
    Westwood,
    Htcp,
    Scalable,
    Hstcp,
    Bic,
    Yeah,
}

impl fmt::Display for CongestionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CongestionAlgorithm::Reno => "reno",
            CongestionAlgorithm::NewReno => "newreno",
            CongestionAlgorithm::Cubic => "cubic",
            CongestionAlgorithm::Bbr => "bbr",
            CongestionAlgorithm::Vegas => "vegas",
            CongestionAlgorithm::Westwood => "westwood",
            CongestionAlgorithm::Htcp => "htcp",
            CongestionAlgorithm::Scalable => "scalable",
            CongestionAlgorithm::Hstcp => "hstcp",
            CongestionAlgorithm::Bic => "bic",
            CongestionAlgorithm::Yeah => "yeah",
        };
        f.write_str(name)
    }
}

/// Cubic scaling constant C
const CUBIC_C: f64 = 0.4;
/// Scalable TCP adds a segment every min(cwnd, 50) acked segments
const SCALABLE_AI_CNT: u32 = 50;
/// HighSpeed TCP behaves like Reno below this window
const HSTCP_LOW_WINDOW: u32 = 38;
/// Largest per-RTT increment for Bic and HighSpeed TCP
const MAX_INCREMENT: u32 = 16;
const MIN_SSTHRESH: u32 = 2;

#[derive(Debug, Clone)]
pub struct CongestionControl {
    algorithm: CongestionAlgorithm,
    mss: u32,
    cwnd: u32,
    ssthresh: u32,
    max_cwnd: u32,
    /// Segments acked since the last congestion avoidance increment
    acked: u32,
    /// Window at the last loss event
    w_max: u32,
    /// Start of the current Cubic epoch
    epoch_start_ms: Option<u64>,
    /// Reno-equivalent window tracked alongside Cubic
    reno_estimate: f64,
}

impl CongestionControl {
    /// `cwnd` starts at 1, `ssthresh` at `max_window`; `cwnd` never grows
    /// past `max_window / mss`
    pub fn new(algorithm: CongestionAlgorithm, mss: u16, max_window: u32) -> Self {
        let mss = u32::from(mss.max(1));
        CongestionControl {
            algorithm,
            mss,
            cwnd: 1,
            ssthresh: max_window,
            max_cwnd: (max_window / mss).max(1),
            acked: 0,
            w_max: 0,
            epoch_start_ms: None,
            reno_estimate: 1.0,
        }
    }

    pub fn algorithm(&self) -> CongestionAlgorithm {
        self.algorithm
    }

    /// Switch algorithms, keeping the current window
    pub fn set_algorithm(&mut self, algorithm: CongestionAlgorithm) {
        self.algorithm = algorithm;
        self.acked = 0;
        self.epoch_start_ms = None;
    }

    pub fn cwnd(&self) -> u32 {
        self.cwnd
    }

    pub fn ssthresh(&self) -> u32 {
        self.ssthresh
    }

    /// Congestion window in bytes
    pub fn window_bytes(&self) -> u32 {
        self.cwnd.saturating_mul(self.mss)
    }

    pub fn in_slow_start(&self) -> bool {
        self.cwnd < self.ssthresh
    }

    /// New data acknowledged
    pub fn on_ack(&mut self, bytes_acked: u32, now_ms: u64) {
        if bytes_acked == 0 {
            return;
        }
        let segments = ((bytes_acked + self.mss - 1) / self.mss).max(1);

        if self.in_slow_start() {
            self.cwnd = self.cwnd.saturating_add(segments).min(self.max_cwnd);
            return;
        }

        match self.algorithm {
            CongestionAlgorithm::Cubic => self.cubic_update(segments, now_ms),
            CongestionAlgorithm::Scalable => {
                let cnt = self.cwnd.min(SCALABLE_AI_CNT);
                self.grow(segments, cnt, 1);
            }
            CongestionAlgorithm::Hstcp => {
                let step = if self.cwnd <= HSTCP_LOW_WINDOW {
                    1
                } else {
                    (self.cwnd / HSTCP_LOW_WINDOW + 1).min(MAX_INCREMENT)
                };
                self.grow(segments, self.cwnd, step);
            }
            CongestionAlgorithm::Bic => {
                // Binary search towards w_max, then climb past it
                let step = if self.cwnd < self.w_max {
                    ((self.w_max - self.cwnd) / 2).clamp(1, MAX_INCREMENT)
                } else {
                    (self.cwnd - self.w_max).clamp(1, MAX_INCREMENT)
                };
                self.grow(segments, self.cwnd, step);
            }
            _ => self.grow(segments, self.cwnd, 1),
        }
    }

    /// Loss detected by duplicate ACKs
    pub fn on_loss(&mut self) {
        self.w_max = self.cwnd;
        self.ssthresh = (self.cwnd / 2).max(MIN_SSTHRESH);
        self.cwnd = self.ssthresh.min(self.max_cwnd);
        self.reset_epoch();
        log::debug!(
            "{} loss: cwnd {} ssthresh {}",
            self.algorithm,
            self.cwnd,
            self.ssthresh
        );
    }

    /// Retransmission timer expired
    pub fn on_timeout(&mut self) {
        self.w_max = self.cwnd;
        self.ssthresh = (self.cwnd / 2).max(MIN_SSTHRESH);
        self.cwnd = 1;
        self.reset_epoch();
        log::debug!("{} timeout: ssthresh {}", self.algorithm, self.ssthresh);
    }

    fn reset_epoch(&mut self) {
        self.acked = 0;
        self.epoch_start_ms = None;
        self.reno_estimate = self.cwnd as f64;
    }

    /// Add `step` segments every time `cnt` segments have been acked
    fn grow(&mut self, segments: u32, cnt: u32, step: u32) {
        let cnt = cnt.max(1);
        self.acked += segments;
        while self.acked >= cnt {
            self.acked -= cnt;
            self.cwnd = self.cwnd.saturating_add(step);
        }
        self.cwnd = self.cwnd.min(self.max_cwnd);
    }

    fn cubic_update(&mut self, segments: u32, now_ms: u64) {
        let epoch_start = *self.epoch_start_ms.get_or_insert(now_ms);
        let t = now_ms.saturating_sub(epoch_start) as f64 / 1000.0;
        let w_max = self.w_max.max(self.cwnd) as f64;
        let k = ((w_max - self.cwnd as f64).max(0.0) / CUBIC_C).cbrt();
        let cubic_target = CUBIC_C * (t - k).powi(3) + w_max;

        self.reno_estimate += segments as f64 / self.cwnd as f64;
        let target = cubic_target.max(self.reno_estimate);

        let cnt = if target > self.cwnd as f64 {
            ((self.cwnd as f64 / (target - self.cwnd as f64)) as u32).max(1)
        } else {
            // Plateau around w_max: grow very slowly
            self.cwnd.saturating_mul(100)
        };
        self.grow(segments, cnt, 1);
    }
}
