//! Jitter buffer
//!
//! Turns an unordered, lossy packet stream into exactly one playout decision
//! per frame tick:
//!
//! - **Filling**: fewer than `target_depth` packets buffered; the caller plays
//!   silence. Entered at start, after a long loss run, and on stream restart.
//! - **Steady**: the packet for `next_expected` is emitted if present,
//!   otherwise a concealment slot is emitted. Either way the cursor advances;
//!   playout never waits for a late packet.
//!
//! Sequence numbers are unwrapped into a 64-bit space relative to the highest
//! sequence seen, so ordering survives the 2^32 wrap.
//!
//! Storage is a ring of `max_depth` slots allocated once in [`JitterBuffer::new`];
//! a packet lives at `sequence % max_depth`. Buffered sequences always span
//! less than one ring, so two of them never share a slot and neither `offer`
//! nor `next` allocates.

use bytes::Bytes;

use crate::config::JitterConfig;
use crate::protocol::Packet;

/// Offset for unwrapped sequence numbers so small backward steps never underflow
const UNWRAP_BASE: u64 = 1 << 32;

/// Consecutive sequences arriving behind the cursor that mean the sender
/// started over from a low sequence
const RESTART_STALE_RUN: u32 = 3;

/// Buffer phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitterState {
    Filling,
    Steady,
}

/// What to play for one tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Playout {
    /// Still buffering; play silence
    Filling,
    /// The expected packet
    Frame(Packet),
    /// The expected packet is missing. `fec` carries the successor's payload
    /// when it is already buffered, for codecs with in-band recovery data.
    Conceal { sequence: u32, fec: Option<Bytes> },
}

/// Result of offering one packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// Buffered; `evicted` older packets were pushed out to make room
    Accepted { evicted: usize },
    /// Behind the playout cursor, or already buffered. Discarded.
    Late,
    /// The sender restarted: either the sequence jumped past the restart
    /// threshold, or a run of consecutive sequences all landed behind the
    /// cursor. The buffer was cleared (`dropped` packets) and refills from
    /// this one.
    Restarted { dropped: usize },
}

/// Jitter buffer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JitterBufferStats {
    pub received: u64,
    pub played: u64,
    pub lost: u64,
    pub late: u64,
    /// Removed unplayed by overflow or stream restart
    pub evicted: u64,
    pub restarts: u64,
    pub depth: usize,
}

/// Reordering buffer between the receiver and the decoder
#[derive(Debug)]
pub struct JitterBuffer {
    config: JitterConfig,
    /// `(unwrapped sequence, packet)` at `sequence % slots.len()`
    slots: Vec<Option<(u64, Packet)>>,
    len: usize,
    state: JitterState,
    /// Playout cursor in Steady; lower bound for accepted packets in Filling
    next_expected: Option<u64>,
    /// Highest unwrapped sequence seen (unwrap reference)
    highest: Option<u64>,
    /// Consecutive concealed ticks
    loss_run: u32,
    /// Last stale sequence and how many consecutive ones preceded it
    stale_run: Option<(u64, u32)>,
    stats: JitterBufferStats,
}

impl JitterBuffer {
    pub fn new(config: JitterConfig) -> Self {
        let capacity = config.max_depth.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);

        Self {
            config,
            slots,
            len: 0,
            state: JitterState::Filling,
            next_expected: None,
            highest: None,
            loss_run: 0,
            stale_run: None,
            stats: JitterBufferStats::default(),
        }
    }

    /// Insert a packet that arrived from the network
    pub fn offer(&mut self, packet: Packet) -> Offer {
        self.stats.received += 1;
        let capacity = self.slots.len() as u64;

        let mut restarted = None;
        let mut key = match self.highest {
            None => UNWRAP_BASE + packet.sequence as u64,
            Some(highest) => {
                let diff = packet.sequence.wrapping_sub(highest as u32) as i32 as i64;
                if diff.unsigned_abs() > self.config.restart_threshold as u64 {
                    tracing::info!(
                        "Sequence jumped from {} to {}, peer stream restarted",
                        highest as u32,
                        packet.sequence
                    );
                    restarted = Some(self.restart());
                    UNWRAP_BASE + packet.sequence as u64
                } else {
                    (highest as i64 + diff) as u64
                }
            }
        };

        if restarted.is_none() {
            let behind_cursor = self.next_expected.is_some_and(|next| key < next);
            let behind_window = self.highest.is_some_and(|highest| key + capacity <= highest);

            if behind_cursor || behind_window {
                if self.extend_stale_run(key) {
                    tracing::info!(
                        "Sequences {}..={} all arrived behind playout, peer stream restarted",
                        packet.sequence.wrapping_sub(RESTART_STALE_RUN - 1),
                        packet.sequence
                    );
                    restarted = Some(self.restart());
                    key = UNWRAP_BASE + packet.sequence as u64;
                } else {
                    return self.discard_late(packet.sequence);
                }
            } else if self.get(key).is_some() {
                return self.discard_late(packet.sequence);
            }
        }

        self.stale_run = None;
        let highest = self.highest.map_or(key, |h| h.max(key));
        self.highest = Some(highest);

        // Freshness over completeness: everything older than one ring behind
        // the newest packet goes, and the cursor skips past it
        let floor = (highest + 1).saturating_sub(capacity);
        let evicted = self.evict_below(floor);
        let skip = match self.next_expected {
            Some(next) => next < floor,
            None => evicted > 0,
        };
        if skip {
            self.next_expected = Some(floor);
        }
        if evicted > 0 {
            self.stats.evicted += evicted as u64;
            tracing::debug!("Jitter buffer overflow, evicted {} packets", evicted);
        }

        let index = (key % capacity) as usize;
        self.slots[index] = Some((key, packet));
        self.len += 1;

        match restarted {
            Some(dropped) => Offer::Restarted { dropped },
            None => Offer::Accepted { evicted },
        }
    }

    /// Decide what plays this tick. Never blocks.
    pub fn next(&mut self) -> Playout {
        if self.state == JitterState::Filling {
            if self.len < self.config.target_depth {
                return Playout::Filling;
            }
            // Everything buffered is at or past the cursor floor
            let Some(first) = self.lowest() else {
                return Playout::Filling;
            };
            self.next_expected = Some(first);
            self.state = JitterState::Steady;
            self.loss_run = 0;
            tracing::debug!(
                "Jitter buffer primed at sequence {} with {} frames",
                first as u32,
                self.len
            );
        }

        let Some(next) = self.next_expected else {
            self.state = JitterState::Filling;
            return Playout::Filling;
        };
        self.next_expected = Some(next + 1);

        if let Some(packet) = self.take(next) {
            self.loss_run = 0;
            self.stats.played += 1;
            return Playout::Frame(packet);
        }

        self.stats.lost += 1;
        self.loss_run += 1;
        let fec = self.get(next + 1).map(|p| p.payload.clone());

        if self.loss_run > self.config.resync_threshold {
            tracing::debug!(
                "{} frames missing in a row, refilling jitter buffer",
                self.loss_run
            );
            self.state = JitterState::Filling;
            self.loss_run = 0;
        }

        Playout::Conceal {
            sequence: next as u32,
            fec,
        }
    }

    /// Forget everything, including the sequence reference
    pub fn reset(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.len = 0;
        self.state = JitterState::Filling;
        self.next_expected = None;
        self.highest = None;
        self.loss_run = 0;
        self.stale_run = None;
    }

    fn restart(&mut self) -> usize {
        let dropped = self.len;
        self.reset();
        self.stats.restarts += 1;
        self.stats.evicted += dropped as u64;
        dropped
    }

    fn discard_late(&mut self, sequence: u32) -> Offer {
        self.stats.late += 1;
        tracing::trace!("Discarding late packet {}", sequence);
        Offer::Late
    }

    /// Count `key` into the current run of stale arrivals. True once the run
    /// is long enough to be a restarted sender rather than stragglers.
    fn extend_stale_run(&mut self, key: u64) -> bool {
        let run = match self.stale_run {
            Some((last, run)) if key == last + 1 => run + 1,
            _ => 1,
        };
        self.stale_run = Some((key, run));
        run >= RESTART_STALE_RUN
    }

    fn slot_index(&self, key: u64) -> usize {
        (key % self.slots.len() as u64) as usize
    }

    fn get(&self, key: u64) -> Option<&Packet> {
        match &self.slots[self.slot_index(key)] {
            Some((stored, packet)) if *stored == key => Some(packet),
            _ => None,
        }
    }

    fn take(&mut self, key: u64) -> Option<Packet> {
        let index = self.slot_index(key);
        if !matches!(&self.slots[index], Some((stored, _)) if *stored == key) {
            return None;
        }
        self.len -= 1;
        self.slots[index].take().map(|(_, packet)| packet)
    }

    fn lowest(&self) -> Option<u64> {
        self.slots.iter().flatten().map(|(key, _)| *key).min()
    }

    fn evict_below(&mut self, floor: u64) -> usize {
        let mut evicted = 0;
        for slot in self.slots.iter_mut() {
            if slot.as_ref().is_some_and(|(key, _)| *key < floor) {
                *slot = None;
                evicted += 1;
            }
        }
        self.len -= evicted;
        evicted
    }

    /// Buffered, unconsumed packets
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn state(&self) -> JitterState {
        self.state
    }

    /// Wire sequence the next Steady tick will look for
    pub fn next_expected(&self) -> Option<u32> {
        self.next_expected.map(|n| n as u32)
    }

    pub fn config(&self) -> &JitterConfig {
        &self.config
    }

    /// Preallocated packet slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn stats(&self) -> JitterBufferStats {
        JitterBufferStats {
            depth: self.len,
            ..self.stats.clone()
        }
    }
}
