//! Receive direction: receive → jitter buffer → decode → playback
//!
//! The playback callback owns the jitter buffer and the decoder through a
//! [`PlayoutEngine`]; the receive thread only feeds it through a lock-free
//! inbox, so nothing in the audio callback can block on the network side.

use std::sync::Arc;

use crate::audio::buffer::{AudioFrame, RingBuffer, SharedRingBuffer};
use crate::audio::jitter::{JitterBuffer, Offer, Playout};
use crate::audio::playback::Playback;
use crate::codec::AudioDecoder;
use crate::config::StreamConfig;
use crate::constants::INBOX_CAPACITY;
use crate::error::Error;
use crate::network::PacketReceiver;
use crate::protocol::Packet;
use crate::stats::StatsCollector;

/// What one pulled frame contains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Decoded from its own packet
    Decoded,
    /// Substitute for a missing or undecodable packet
    Concealed,
    /// Jitter buffer still filling
    Silence,
}

/// Produces one output frame per playback request
pub struct PlayoutEngine {
    inbox: SharedRingBuffer<Packet>,
    jitter: JitterBuffer,
    decoder: Box<dyn AudioDecoder>,
    stats: Arc<StatsCollector>,
    volume: f32,
    next_index: u64,
}

impl PlayoutEngine {
    pub fn new(
        inbox: SharedRingBuffer<Packet>,
        jitter: JitterBuffer,
        decoder: Box<dyn AudioDecoder>,
        stats: Arc<StatsCollector>,
        volume: f32,
    ) -> Self {
        Self {
            inbox,
            jitter,
            decoder,
            stats,
            volume,
            next_index: 0,
        }
    }

    /// Move everything the receiver delivered into the jitter buffer
    fn drain_inbox(&mut self) {
        while let Some(packet) = self.inbox.try_pop() {
            match self.jitter.offer(packet) {
                Offer::Accepted { evicted: 0 } => {}
                Offer::Accepted { evicted } => self.stats.record_dropped(evicted),
                Offer::Late => self.stats.record_late(),
                Offer::Restarted { dropped } => {
                    self.stats.record_stream_reset();
                    self.stats.record_dropped(dropped);
                }
            }
        }
    }

    fn conceal(&mut self, fec: Option<&[u8]>, out: &mut AudioFrame) {
        let result = match fec {
            Some(next) => self.decoder.recover(next, out),
            None => self.decoder.conceal(out).map(|_| false),
        };
        match result {
            Ok(true) => self.stats.record_fec_recovered(),
            Ok(false) => {}
            Err(e) => {
                tracing::trace!("Concealment failed: {}", e);
                out.fill_silence();
            }
        }
        self.stats.record_concealed();
    }

    /// Fill `out` with the next frame. Never blocks.
    pub fn pull(&mut self, out: &mut AudioFrame) -> FrameKind {
        self.drain_inbox();

        let kind = match self.jitter.next() {
            Playout::Filling => {
                out.fill_silence();
                self.stats.record_silent();
                FrameKind::Silence
            }
            Playout::Frame(packet) => match self.decoder.decode(&packet.payload, out) {
                Ok(()) => {
                    self.stats.record_decoded();
                    FrameKind::Decoded
                }
                Err(e) => {
                    self.stats.record_decode_error();
                    tracing::debug!("Packet {} failed to decode: {}", packet.sequence, e);
                    self.conceal(None, out);
                    FrameKind::Concealed
                }
            },
            Playout::Conceal { sequence, fec } => {
                self.stats.record_lost();
                tracing::trace!("Concealing missing packet {}", sequence);
                self.conceal(fec.as_deref(), out);
                FrameKind::Concealed
            }
        };

        out.apply_gain(self.volume);
        out.index = self.next_index;
        self.next_index += 1;
        self.stats.set_jitter_depth(self.jitter.len());

        kind
    }
}

pub struct Inbound {
    receiver: PacketReceiver,
    playback: Box<dyn Playback>,
}

impl Inbound {
    /// Start playback (silence until packets arrive), then the receive thread
    pub fn start(
        config: &StreamConfig,
        mut receiver: PacketReceiver,
        mut playback: Box<dyn Playback>,
        decoder: Box<dyn AudioDecoder>,
        stats: Arc<StatsCollector>,
    ) -> Result<Self, Error> {
        let inbox: SharedRingBuffer<Packet> = Arc::new(RingBuffer::new(INBOX_CAPACITY));
        let mut engine = PlayoutEngine::new(
            inbox.clone(),
            JitterBuffer::new(config.jitter.clone()),
            decoder,
            stats.clone(),
            config.volume,
        );

        playback.start(Box::new(move |out: &mut AudioFrame| {
            engine.pull(out);
        }))?;

        if let Err(e) = receiver.start(inbox, stats) {
            playback.stop();
            return Err(e.into());
        }

        Ok(Self { receiver, playback })
    }

    /// Packets are arriving into a running playback device
    pub fn is_active(&self) -> bool {
        self.receiver.is_running() && self.playback.is_running()
    }

    pub fn stop(&mut self) {
        self.receiver.stop();
        self.playback.stop();
    }
}

impl Drop for Inbound {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FrameClock;
    use crate::config::JitterConfig;
    use crate::error::CodecError;
    use crate::network::receiver::deliver;
    use bytes::Bytes;
    use proptest::prelude::*;

    /// Writes the payload's first byte into every sample
    struct MarkerDecoder;

    impl AudioDecoder for MarkerDecoder {
        fn decode(&mut self, payload: &[u8], out: &mut AudioFrame) -> Result<(), CodecError> {
            match payload.first() {
                Some(0xFF) | None => Err(CodecError::DecodingFailed("bad payload".into())),
                Some(&marker) => {
                    out.samples.fill(marker as f32);
                    Ok(())
                }
            }
        }

        fn conceal(&mut self, out: &mut AudioFrame) -> Result<(), CodecError> {
            out.samples.fill(-1.0);
            Ok(())
        }
    }

    fn packet(sequence: u32, marker: u8) -> Packet {
        Packet {
            sequence,
            timestamp: sequence.wrapping_mul(20),
            payload: Bytes::from(vec![marker]),
        }
    }

    fn engine(target_depth: usize) -> (PlayoutEngine, SharedRingBuffer<Packet>, Arc<StatsCollector>) {
        let inbox = Arc::new(RingBuffer::new(INBOX_CAPACITY));
        let stats = Arc::new(StatsCollector::new());
        let jitter = JitterBuffer::new(JitterConfig {
            target_depth,
            max_depth: 16,
            resync_threshold: 10,
            restart_threshold: 1000,
        });
        let engine = PlayoutEngine::new(inbox.clone(), jitter, Box::new(MarkerDecoder), stats.clone(), 1.0);
        (engine, inbox, stats)
    }

    #[test]
    fn test_reordered_stream_with_gap() {
        let (mut engine, inbox, stats) = engine(2);
        let mut out = AudioFrame::silence(&FrameClock::new(48000, 1, 4));

        for seq in [0u32, 3, 1, 4] {
            let _ = inbox.push(packet(seq, seq as u8 + 10));
        }

        let kinds: Vec<_> = (0..5)
            .map(|_| {
                let kind = engine.pull(&mut out);
                (kind, out.samples[0])
            })
            .collect();

        assert_eq!(
            kinds,
            vec![
                (FrameKind::Decoded, 10.0),
                (FrameKind::Decoded, 11.0),
                (FrameKind::Concealed, -1.0),
                (FrameKind::Decoded, 13.0),
                (FrameKind::Decoded, 14.0),
            ]
        );

        let s = stats.snapshot();
        assert_eq!(s.frames_concealed, 1);
        assert_eq!(s.packets_lost, 1);
        assert_eq!(s.frames_decoded, 4);
    }

    #[test]
    fn test_silence_while_filling() {
        let (mut engine, inbox, stats) = engine(3);
        let mut out = AudioFrame::new(vec![0.5; 4], 1, 0);

        assert_eq!(engine.pull(&mut out), FrameKind::Silence);
        assert_eq!(out.peak(), 0.0);

        let _ = inbox.push(packet(0, 1));
        assert_eq!(engine.pull(&mut out), FrameKind::Silence);
        assert_eq!(stats.snapshot().frames_silent, 2);
        assert_eq!(stats.snapshot().jitter_depth, 1);
    }

    #[test]
    fn test_decode_error_is_concealed() {
        let (mut engine, inbox, stats) = engine(1);
        let mut out = AudioFrame::silence(&FrameClock::new(48000, 1, 4));

        let _ = inbox.push(packet(0, 0xFF));
        assert_eq!(engine.pull(&mut out), FrameKind::Concealed);

        let s = stats.snapshot();
        assert_eq!(s.decode_errors, 1);
        assert_eq!(s.frames_concealed, 1);
        assert_eq!(s.packets_lost, 0);
    }

    #[test]
    fn test_late_packets_counted() {
        let (mut engine, inbox, stats) = engine(1);
        let mut out = AudioFrame::silence(&FrameClock::new(48000, 1, 4));

        let _ = inbox.push(packet(0, 1));
        let _ = inbox.push(packet(1, 2));
        engine.pull(&mut out);
        engine.pull(&mut out);
        let _ = inbox.push(packet(0, 1));
        let _ = inbox.push(packet(1, 2));
        engine.pull(&mut out);

        assert_eq!(stats.snapshot().packets_late, 2);
    }

    #[test]
    fn test_volume_and_indices() {
        let inbox = Arc::new(RingBuffer::new(8));
        let stats = Arc::new(StatsCollector::new());
        let mut engine = PlayoutEngine::new(
            inbox.clone(),
            JitterBuffer::new(JitterConfig {
                target_depth: 1,
                ..JitterConfig::default()
            }),
            Box::new(MarkerDecoder),
            stats,
            0.5,
        );
        let mut out = AudioFrame::silence(&FrameClock::new(48000, 1, 4));

        let _ = inbox.push(packet(7, 4));
        engine.pull(&mut out);
        assert_eq!(out.samples[0], 2.0);
        assert_eq!(out.index, 0);
        engine.pull(&mut out);
        assert_eq!(out.index, 1);
    }

    #[test]
    fn test_peer_restart_counted() {
        let (mut engine, inbox, stats) = engine(1);
        let mut out = AudioFrame::silence(&FrameClock::new(48000, 1, 4));

        let _ = inbox.push(packet(50_000, 1));
        let _ = inbox.push(packet(50_001, 1));
        engine.pull(&mut out);
        let _ = inbox.push(packet(0, 2));
        engine.pull(&mut out);
        assert_eq!(out.samples[0], 2.0);

        let s = stats.snapshot();
        assert_eq!(s.stream_resets, 1);
        assert_eq!(s.packets_dropped, 1);
    }

    /// Every received packet was decoded, failed to decode, was late, was
    /// dropped, or is still buffered
    fn assert_accounted(s: &crate::stats::StatsSnapshot) {
        assert_eq!(
            s.packets_received,
            s.frames_decoded + s.decode_errors + s.packets_late + s.packets_dropped + s.jitter_depth,
            "{:?}",
            s
        );
    }

    #[test]
    fn test_every_packet_accounted() {
        let (mut engine, inbox, stats) = engine(1);
        let mut out = AudioFrame::silence(&FrameClock::new(48000, 1, 4));

        // Reordered, with a duplicate of 1
        for seq in [0, 2, 1, 1] {
            deliver(&inbox, &stats, packet(seq, 1), 1);
        }
        deliver(&inbox, &stats, packet(3, 0xFF), 1);
        let kinds: Vec<_> = (0..4).map(|_| engine.pull(&mut out)).collect();
        assert_eq!(
            kinds,
            vec![FrameKind::Decoded, FrameKind::Decoded, FrameKind::Decoded, FrameKind::Concealed]
        );

        // A straggler, two buffered packets, then the peer starts over
        for seq in [0, 4, 5, 50_000] {
            deliver(&inbox, &stats, packet(seq, 1), 1);
        }
        assert_eq!(engine.pull(&mut out), FrameKind::Decoded);

        let s = stats.snapshot();
        assert_eq!(s.packets_received, 9);
        assert_eq!(s.frames_decoded, 4);
        assert_eq!(s.decode_errors, 1);
        assert_eq!(s.packets_late, 2);
        assert_eq!(s.packets_dropped, 2);
        assert_eq!(s.stream_resets, 1);
        assert_eq!(s.frames_played(), 5);
        assert_accounted(&s);
    }

    #[test]
    fn test_inbox_overflow_accounted() {
        let inbox = Arc::new(RingBuffer::new(2));
        let stats = Arc::new(StatsCollector::new());
        let mut engine = PlayoutEngine::new(
            inbox.clone(),
            JitterBuffer::new(JitterConfig {
                target_depth: 1,
                ..JitterConfig::default()
            }),
            Box::new(MarkerDecoder),
            stats.clone(),
            1.0,
        );
        let mut out = AudioFrame::silence(&FrameClock::new(48000, 1, 4));

        for seq in 0..5 {
            deliver(&inbox, &stats, packet(seq, 1), 1);
        }
        assert_eq!(engine.pull(&mut out), FrameKind::Decoded);

        let s = stats.snapshot();
        assert_eq!(s.packets_dropped, 3);
        assert_eq!(s.jitter_depth, 1);
        assert_accounted(&s);
    }

    /// One arrival: an offset ahead of the playout position, a kind
    /// (0 = undecodable, 1 = sender restarts first, else a normal frame),
    /// then how many frames the device pulls
    fn arrivals() -> impl Strategy<Value = Vec<(u32, u8, u8)>> {
        proptest::collection::vec((0u32..24, 0u8..12, 0u8..3), 1..300)
    }

    proptest! {
        #[test]
        fn packets_and_pulls_are_accounted_for(arrivals in arrivals()) {
            let inbox = Arc::new(RingBuffer::new(4));
            let stats = Arc::new(StatsCollector::new());
            let mut engine = PlayoutEngine::new(
                inbox.clone(),
                JitterBuffer::new(JitterConfig {
                    target_depth: 2,
                    max_depth: 6,
                    resync_threshold: 4,
                    restart_threshold: 1000,
                }),
                Box::new(MarkerDecoder),
                stats.clone(),
                1.0,
            );
            let mut out = AudioFrame::silence(&FrameClock::new(48000, 1, 4));
            let mut base = 0u32;
            let mut pulls = 0u64;

            for (offset, kind, ticks) in arrivals {
                if kind == 1 {
                    base = base.wrapping_add(1_000_000);
                }
                let marker = if kind == 0 { 0xFF } else { 1 };
                let seq = base.wrapping_add(pulls as u32).wrapping_add(offset);
                deliver(&inbox, &stats, packet(seq, marker), 1);

                for _ in 0..ticks {
                    engine.pull(&mut out);
                    pulls += 1;
                }
            }
            // Drain the inbox into the jitter buffer
            engine.pull(&mut out);
            pulls += 1;

            let s = stats.snapshot();
            prop_assert_eq!(
                s.packets_received,
                s.frames_decoded + s.decode_errors + s.packets_late + s.packets_dropped + s.jitter_depth
            );
            prop_assert_eq!(s.frames_played(), pulls);
        }
    }
}
