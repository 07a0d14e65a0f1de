//! Pipeline counters
//!
//! Every counter is a relaxed atomic: pipeline threads increment, the UI
//! reads a slightly stale [`StatsSnapshot`]. Nothing here feeds back into
//! pipeline behavior.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

#[inline]
fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Shared, lock-free counter set for one session
#[derive(Debug, Default)]
pub struct StatsCollector {
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    send_errors: AtomicU64,
    packets_received: AtomicU64,
    bytes_received: AtomicU64,
    packets_malformed: AtomicU64,
    packets_lost: AtomicU64,
    packets_late: AtomicU64,
    packets_dropped: AtomicU64,
    frames_captured: AtomicU64,
    capture_overruns: AtomicU64,
    frames_encoded: AtomicU64,
    encode_errors: AtomicU64,
    frames_decoded: AtomicU64,
    decode_errors: AtomicU64,
    frames_concealed: AtomicU64,
    fec_recovered: AtomicU64,
    frames_silent: AtomicU64,
    stream_resets: AtomicU64,
    jitter_depth: AtomicU64,
    jitter_us: AtomicU64,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A datagram of `bytes` left the socket
    pub fn record_sent(&self, bytes: usize) {
        bump(&self.packets_sent);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_send_error(&self) {
        bump(&self.send_errors);
    }

    /// A well-formed datagram of `bytes` arrived
    pub fn record_received(&self, bytes: usize) {
        bump(&self.packets_received);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        bump(&self.packets_malformed);
    }

    /// A sequence number was skipped at playout
    pub fn record_lost(&self) {
        bump(&self.packets_lost);
    }

    /// Arrived after its frame was played, or a duplicate
    pub fn record_late(&self) {
        bump(&self.packets_late);
    }

    /// Buffered packets thrown away by overflow eviction or a stream restart
    pub fn record_dropped(&self, count: usize) {
        self.packets_dropped.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_captured(&self) {
        bump(&self.frames_captured);
    }

    pub fn record_capture_overrun(&self) {
        bump(&self.capture_overruns);
    }

    pub fn record_encoded(&self) {
        bump(&self.frames_encoded);
    }

    pub fn record_encode_error(&self) {
        bump(&self.encode_errors);
    }

    pub fn record_decoded(&self) {
        bump(&self.frames_decoded);
    }

    pub fn record_decode_error(&self) {
        bump(&self.decode_errors);
    }

    pub fn record_concealed(&self) {
        bump(&self.frames_concealed);
    }

    pub fn record_fec_recovered(&self) {
        bump(&self.fec_recovered);
    }

    pub fn record_silent(&self) {
        bump(&self.frames_silent);
    }

    pub fn record_stream_reset(&self) {
        bump(&self.stream_resets);
    }

    /// Gauge: frames currently held by the jitter buffer
    pub fn set_jitter_depth(&self, depth: usize) {
        self.jitter_depth.store(depth as u64, Ordering::Relaxed);
    }

    /// Gauge: smoothed interarrival jitter in microseconds
    pub fn set_jitter_us(&self, jitter_us: u64) {
        self.jitter_us.store(jitter_us, Ordering::Relaxed);
    }

    /// Immutable copy for display
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            captured_at: Utc::now(),
            packets_sent: load(&self.packets_sent),
            bytes_sent: load(&self.bytes_sent),
            send_errors: load(&self.send_errors),
            packets_received: load(&self.packets_received),
            bytes_received: load(&self.bytes_received),
            packets_malformed: load(&self.packets_malformed),
            packets_lost: load(&self.packets_lost),
            packets_late: load(&self.packets_late),
            packets_dropped: load(&self.packets_dropped),
            frames_captured: load(&self.frames_captured),
            capture_overruns: load(&self.capture_overruns),
            frames_encoded: load(&self.frames_encoded),
            encode_errors: load(&self.encode_errors),
            frames_decoded: load(&self.frames_decoded),
            decode_errors: load(&self.decode_errors),
            frames_concealed: load(&self.frames_concealed),
            fec_recovered: load(&self.fec_recovered),
            frames_silent: load(&self.frames_silent),
            stream_resets: load(&self.stream_resets),
            jitter_depth: load(&self.jitter_depth),
            jitter_ms: load(&self.jitter_us) as f64 / 1000.0,
        }
    }
}

/// Point-in-time copy of a [`StatsCollector`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub captured_at: DateTime<Utc>,
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub send_errors: u64,
    pub packets_received: u64,
    pub bytes_received: u64,
    pub packets_malformed: u64,
    pub packets_lost: u64,
    pub packets_late: u64,
    pub packets_dropped: u64,
    pub frames_captured: u64,
    pub capture_overruns: u64,
    pub frames_encoded: u64,
    pub encode_errors: u64,
    pub frames_decoded: u64,
    pub decode_errors: u64,
    pub frames_concealed: u64,
    pub fec_recovered: u64,
    pub frames_silent: u64,
    pub stream_resets: u64,
    pub jitter_depth: u64,
    pub jitter_ms: f64,
}

impl StatsSnapshot {
    /// Fraction of sequenced frames that had to be concealed
    pub fn loss_rate(&self) -> f32 {
        let played = self.frames_decoded + self.frames_concealed;
        if played == 0 {
            0.0
        } else {
            self.frames_concealed as f32 / played as f32
        }
    }

    /// Total frames handed to the playback device
    pub fn frames_played(&self) -> u64 {
        self.frames_decoded + self.frames_concealed + self.frames_silent
    }
}
