//! Clock synchronization against the host
//!
//! The session's global clock is the host's local clock. Participants
//! estimate their offset from it with Ping/Pong exchanges and add that
//! offset to their own clock whenever they need "now" in global time.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::sync::SyncStatus;

/// Number of RTT samples to keep for averaging
const RTT_SAMPLE_COUNT: usize = 5;

/// Round trips slower than this are probably queued behind something else,
/// so their offset estimate is trusted less
const MAX_TRUSTED_RTT_MS: i64 = 1500;

/// EMA weight for samples with an untrusted round trip
const OUTLIER_ALPHA: f64 = 0.05;

/// Offsets or round trips beyond a year mean a broken clock or a corrupt Pong
const MAX_PLAUSIBLE_MS: i64 = 365 * 24 * 60 * 60 * 1000;

/// Source of wall-clock time in milliseconds
pub trait Clock: Send + Sync + fmt::Debug {
    fn now_ms(&self) -> i64;
}

/// The device's wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default()
    }
}

/// A clock that only moves when told to; for simulations and tests
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(start_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Result of one Ping/Pong exchange
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockSample {
    /// Host clock minus local clock
    pub offset_ms: f64,
    /// Network round trip, excluding the host's processing time
    pub round_trip_ms: i64,
}

impl ClockSample {
    /// Two-timestamp NTP estimate.
    ///
    /// `t0` local send, `t1` host receipt, `t2` host reply, `t3` local receipt.
    /// `None` if the timestamps are too far apart to be a real exchange.
    pub fn measure(t0: i64, t1: i64, t2: i64, t3: i64) -> Option<Self> {
        let (t0, t1, t2, t3) = (t0 as i128, t1 as i128, t2 as i128, t3 as i128);
        let offset_ms = ((t1 - t0) + (t2 - t3)) as f64 / 2.0;
        let round_trip = (t3 - t0) - (t2 - t1);
        if offset_ms.abs() > MAX_PLAUSIBLE_MS as f64 || round_trip.abs() > MAX_PLAUSIBLE_MS as i128
        {
            return None;
        }
        Some(Self {
            offset_ms,
            round_trip_ms: round_trip as i64,
        })
    }
}

/// Snapshot of the sync engine for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClockStats {
    pub offset_ms: i64,
    pub avg_rtt_ms: Option<i64>,
    pub samples: u32,
    pub consecutive_misses: u32,
    pub status: SyncStatus,
}

/// Generate an identifier for a probe
pub fn probe_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}

/// Estimates the offset between the local clock and the session's global clock
#[derive(Debug)]
pub struct ClockSync {
    clock: Arc<dyn Clock>,
    /// Probes awaiting a Pong, keyed by id, with their local send time
    pending: HashMap<String, i64>,
    /// Smoothed offset; `None` until the first exchange completes
    offset_ms: Option<f64>,
    rtt_samples: VecDeque<i64>,
    sample_count: u32,
    consecutive_misses: u32,
    status: SyncStatus,
    alpha: f64,
    ping_timeout_ms: i64,
    max_missed_pings: u32,
}

impl ClockSync {
    pub fn new(clock: Arc<dyn Clock>, config: &SyncConfig) -> Self {
        Self {
            clock,
            pending: HashMap::new(),
            offset_ms: None,
            rtt_samples: VecDeque::with_capacity(RTT_SAMPLE_COUNT),
            sample_count: 0,
            consecutive_misses: 0,
            status: SyncStatus::Waiting,
            alpha: config.clock_smoothing.clamp(0.0, 1.0),
            ping_timeout_ms: config.ping_timeout_ms as i64,
            max_missed_pings: config.max_missed_pings.max(1),
        }
    }

    pub fn local_now(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Current time on the session clock. The host's own clock defines it.
    pub fn global_now(&self, is_host: bool) -> i64 {
        if is_host {
            self.local_now()
        } else {
            self.local_now().saturating_add(self.offset_ms())
        }
    }

    /// Smoothed offset, zero before the first exchange
    pub fn offset_ms(&self) -> i64 {
        self.offset_ms.map(|o| o.round() as i64).unwrap_or(0)
    }

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    /// Register a new probe. Returns `(id, client_timestamp)` for the Ping.
    pub fn create_ping(&mut self) -> (String, i64) {
        let id = probe_id();
        let sent_at = self.local_now();
        self.pending.insert(id.clone(), sent_at);

        if self.status == SyncStatus::Waiting {
            self.status = SyncStatus::Syncing;
        }
        (id, sent_at)
    }

    /// Feed a Pong. Returns the sample if it answered one of our probes.
    pub fn handle_pong(
        &mut self,
        id: &str,
        client_timestamp: i64,
        server_timestamp: i64,
        server_reply_timestamp: i64,
    ) -> Option<ClockSample> {
        // Pongs addressed to other participants share the channel
        self.pending.remove(id)?;

        let received_at = self.local_now();
        let Some(sample) = ClockSample::measure(
            client_timestamp,
            server_timestamp,
            server_reply_timestamp,
            received_at,
        ) else {
            warn!(
                "Discarding implausible clock sample (sent {}, host {}/{}, received {})",
                client_timestamp, server_timestamp, server_reply_timestamp, received_at
            );
            return None;
        };
        if sample.round_trip_ms < 0 {
            warn!(
                "Discarding clock sample with negative round trip ({}ms)",
                sample.round_trip_ms
            );
            return None;
        }

        self.sample_count = self.sample_count.saturating_add(1);
        self.consecutive_misses = 0;

        let offset = match self.offset_ms {
            None => sample.offset_ms,
            Some(current) => {
                let alpha = if sample.round_trip_ms > MAX_TRUSTED_RTT_MS {
                    debug!(
                        "Clock sync: slow round trip {}ms, using damped alpha={}",
                        sample.round_trip_ms, OUTLIER_ALPHA
                    );
                    OUTLIER_ALPHA
                } else {
                    self.alpha
                };
                alpha * sample.offset_ms + (1.0 - alpha) * current
            }
        };
        self.offset_ms = Some(offset);

        if self.rtt_samples.len() >= RTT_SAMPLE_COUNT {
            self.rtt_samples.pop_front();
        }
        self.rtt_samples.push_back(sample.round_trip_ms);

        if self.status != SyncStatus::Ready {
            info!("Clock synced with host: offset={}ms", offset.round());
        }
        self.status = SyncStatus::Ready;

        debug!(
            "Clock sample: offset={:+.1}ms rtt={}ms smoothed={:+}ms (samples={})",
            sample.offset_ms,
            sample.round_trip_ms,
            self.offset_ms(),
            self.sample_count
        );

        Some(sample)
    }

    /// Drop probes that outlived the timeout. Returns how many were dropped.
    ///
    /// The offset is left as it was; only the status degrades, and only
    /// after several consecutive misses.
    pub fn expire_pending(&mut self) -> usize {
        let now = self.local_now();
        let timeout = self.ping_timeout_ms;
        let before = self.pending.len();
        self.pending
            .retain(|_, sent_at| now.saturating_sub(*sent_at) < timeout);
        let expired = before - self.pending.len();

        if expired > 0 {
            self.consecutive_misses = self.consecutive_misses.saturating_add(expired as u32);
            debug!(
                "Clock sync: {} probe(s) timed out ({} consecutive)",
                expired, self.consecutive_misses
            );
            if self.consecutive_misses >= self.max_missed_pings && self.status != SyncStatus::Error
            {
                warn!(
                    "Clock sync: host missed {} probes, keeping stale offset {}ms",
                    self.consecutive_misses,
                    self.offset_ms()
                );
                self.status = SyncStatus::Error;
            }
        }
        expired
    }

    /// Average round trip over recent samples
    pub fn avg_rtt_ms(&self) -> Option<i64> {
        if self.rtt_samples.is_empty() {
            return None;
        }
        let sum: i64 = self.rtt_samples.iter().sum();
        Some(sum / self.rtt_samples.len() as i64)
    }

    pub fn stats(&self) -> ClockStats {
        ClockStats {
            offset_ms: self.offset_ms(),
            avg_rtt_ms: self.avg_rtt_ms(),
            samples: self.sample_count,
            consecutive_misses: self.consecutive_misses,
            status: self.status,
        }
    }

    /// Forget everything (when leaving a session)
    pub fn reset(&mut self) {
        self.pending.clear();
        self.offset_ms = None;
        self.rtt_samples.clear();
        self.sample_count = 0;
        self.consecutive_misses = 0;
        self.status = SyncStatus::Waiting;
    }
}
