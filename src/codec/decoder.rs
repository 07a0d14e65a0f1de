//! Opus decoder wrapper
//!
//! Provides Opus decoding with packet loss concealment and in-band FEC
//! recovery.

use opus::{Channels, Decoder};

use crate::audio::buffer::AudioFrame;
use crate::clock::FrameClock;
use crate::codec::concealment::{ConcealmentPolicy, Concealer};
use crate::error::CodecError;

/// Turns payloads back into frames, and synthesizes frames for gaps
pub trait AudioDecoder: Send {
    /// Decode one payload into `out`, which holds exactly one frame
    fn decode(&mut self, payload: &[u8], out: &mut AudioFrame) -> Result<(), CodecError>;

    /// Produce a substitute for one missing frame
    fn conceal(&mut self, out: &mut AudioFrame) -> Result<(), CodecError>;

    /// Rebuild a missing frame from the recovery data carried by its
    /// successor. Returns `false` if it fell back to plain concealment.
    fn recover(&mut self, next_payload: &[u8], out: &mut AudioFrame) -> Result<bool, CodecError> {
        let _ = next_payload;
        self.conceal(out).map(|_| false)
    }
}

/// Opus decoder wrapper
pub struct OpusDecoder {
    decoder: Decoder,
    clock: FrameClock,
    fec: bool,
    concealer: Concealer,
    /// Target for native PLC when another policy shapes the output
    scratch: Vec<f32>,
    /// Frames decoded
    frames_decoded: u64,
    /// Frames concealed (PLC or policy)
    frames_concealed: u64,
    /// Frames rebuilt from FEC data
    frames_recovered: u64,
}

impl OpusDecoder {
    /// Create a new Opus decoder
    pub fn new(clock: FrameClock, policy: ConcealmentPolicy, fec: bool) -> Result<Self, CodecError> {
        let channels = match clock.channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            _ => {
                return Err(CodecError::DecoderInit(format!(
                    "Unsupported channel count: {}",
                    clock.channels
                )))
            }
        };

        let decoder = Decoder::new(clock.sample_rate, channels)
            .map_err(|e| CodecError::DecoderInit(e.to_string()))?;

        let frame_len = clock.samples_per_frame();
        Ok(Self {
            decoder,
            clock,
            fec,
            concealer: Concealer::new(policy, clock.channels, frame_len),
            scratch: vec![0.0; frame_len],
            frames_decoded: 0,
            frames_concealed: 0,
            frames_recovered: 0,
        })
    }

    fn check_frame(&self, out: &AudioFrame) -> Result<(), CodecError> {
        if out.samples.len() != self.clock.samples_per_frame() {
            return Err(CodecError::InvalidFrameSize(out.samples.len()));
        }
        Ok(())
    }

    fn check_decoded(&self, samples: usize) -> Result<(), CodecError> {
        if samples != self.clock.frame_samples {
            return Err(CodecError::DecodingFailed(format!(
                "expected {} samples per channel, got {}",
                self.clock.frame_samples, samples
            )));
        }
        Ok(())
    }

    /// Reset decoder state
    pub fn reset(&mut self) -> Result<(), CodecError> {
        self.decoder
            .reset_state()
            .map_err(|e| CodecError::DecoderInit(e.to_string()))
    }

    pub fn clock(&self) -> &FrameClock {
        &self.clock
    }

    pub fn policy(&self) -> ConcealmentPolicy {
        self.concealer.policy()
    }

    /// Get statistics
    pub fn stats(&self) -> DecoderStats {
        let total = self.frames_decoded + self.frames_concealed;
        DecoderStats {
            frames_decoded: self.frames_decoded,
            frames_concealed: self.frames_concealed,
            frames_recovered: self.frames_recovered,
            loss_rate: if total > 0 {
                self.frames_concealed as f32 / total as f32
            } else {
                0.0
            },
        }
    }
}

impl AudioDecoder for OpusDecoder {
    fn decode(&mut self, payload: &[u8], out: &mut AudioFrame) -> Result<(), CodecError> {
        self.check_frame(out)?;

        let samples = self
            .decoder
            .decode_float(payload, &mut out.samples, false)
            .map_err(|e| CodecError::DecodingFailed(e.to_string()))?;
        self.check_decoded(samples)?;

        self.concealer.observe(&out.samples);
        self.frames_decoded += 1;
        Ok(())
    }

    fn conceal(&mut self, out: &mut AudioFrame) -> Result<(), CodecError> {
        self.check_frame(out)?;

        // Native PLC always runs so the decoder's state stays continuous
        let target = match self.concealer.policy() {
            ConcealmentPolicy::Native => &mut out.samples,
            _ => &mut self.scratch,
        };
        self.decoder
            .decode_float(&[], target, false)
            .map_err(|e| CodecError::DecodingFailed(e.to_string()))?;

        if self.concealer.policy() != ConcealmentPolicy::Native {
            self.concealer.fill(&mut out.samples);
        }

        self.frames_concealed += 1;
        Ok(())
    }

    fn recover(&mut self, next_payload: &[u8], out: &mut AudioFrame) -> Result<bool, CodecError> {
        if !self.fec {
            return self.conceal(out).map(|_| false);
        }
        self.check_frame(out)?;

        match self.decoder.decode_float(next_payload, &mut out.samples, true) {
            Ok(samples) if samples == self.clock.frame_samples => {
                self.concealer.observe(&out.samples);
                self.frames_recovered += 1;
                Ok(true)
            }
            Ok(_) | Err(_) => {
                tracing::trace!("FEC recovery unavailable, concealing");
                self.conceal(out).map(|_| false)
            }
        }
    }
}

/// Decoder statistics
#[derive(Debug, Clone)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    pub frames_concealed: u64,
    pub frames_recovered: u64,
    pub loss_rate: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encoder::{AudioEncoder, OpusEncoder};
    use crate::config::{OpusConfig, StreamConfig};

    fn sine_frame(clock: &FrameClock, index: u64) -> AudioFrame {
        let mut samples = Vec::with_capacity(clock.samples_per_frame());
        for i in 0..clock.frame_samples {
            let n = index as usize * clock.frame_samples + i;
            let t = n as f32 / clock.sample_rate as f32;
            let value = (t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 0.5;
            for _ in 0..clock.channels {
                samples.push(value);
            }
        }
        AudioFrame::new(samples, clock.channels, index)
    }

    fn codec_pair(policy: ConcealmentPolicy, fec: bool) -> (OpusEncoder, OpusDecoder) {
        let config = StreamConfig {
            fec,
            expected_loss_percent: 10,
            ..StreamConfig::default()
        };
        let clock = config.clock();
        (
            OpusEncoder::new(OpusConfig::for_stream(&config)).unwrap(),
            OpusDecoder::new(clock, policy, fec).unwrap(),
        )
    }

    #[test]
    fn test_decoder_creation() {
        let clock = FrameClock::new(48000, 1, 480);
        let decoder = OpusDecoder::new(clock, ConcealmentPolicy::Native, false).unwrap();
        assert_eq!(decoder.clock().samples_per_frame(), 480);
        assert!(OpusDecoder::new(FrameClock::new(48000, 3, 960), ConcealmentPolicy::Native, false).is_err());
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let (mut encoder, mut decoder) = codec_pair(ConcealmentPolicy::Native, false);
        let clock = *decoder.clock();
        let mut out = AudioFrame::silence(&clock);

        // A few frames so the codec settles past its lookahead
        for index in 0..5 {
            let encoded = encoder.encode(&sine_frame(&clock, index)).unwrap();
            decoder.decode(&encoded, &mut out).unwrap();
        }

        assert_eq!(out.samples.len(), clock.samples_per_frame());
        assert!(out.peak() > 0.1);
        assert_eq!(decoder.stats().frames_decoded, 5);
    }

    #[test]
    fn test_native_plc() {
        let clock = FrameClock::default();
        let mut decoder = OpusDecoder::new(clock, ConcealmentPolicy::Native, false).unwrap();
        let mut out = AudioFrame::silence(&clock);

        decoder.conceal(&mut out).unwrap();
        assert_eq!(out.samples.len(), clock.samples_per_frame());
        assert_eq!(decoder.stats().frames_concealed, 1);
    }

    #[test]
    fn test_silence_policy_after_audio() {
        let (mut encoder, mut decoder) = codec_pair(ConcealmentPolicy::Silence, false);
        let clock = *decoder.clock();
        let mut out = AudioFrame::silence(&clock);

        for index in 0..3 {
            let encoded = encoder.encode(&sine_frame(&clock, index)).unwrap();
            decoder.decode(&encoded, &mut out).unwrap();
        }
        decoder.conceal(&mut out).unwrap();
        assert_eq!(out.peak(), 0.0);

        // Stream carries on after the gap
        let encoded = encoder.encode(&sine_frame(&clock, 4)).unwrap();
        assert!(decoder.decode(&encoded, &mut out).is_ok());
    }

    #[test]
    fn test_fec_recovery() {
        let (mut encoder, mut decoder) = codec_pair(ConcealmentPolicy::Native, true);
        let clock = *decoder.clock();
        let mut out = AudioFrame::silence(&clock);

        let packets: Vec<_> = (0..6)
            .map(|index| encoder.encode(&sine_frame(&clock, index)).unwrap())
            .collect();

        for packet in &packets[..4] {
            decoder.decode(packet, &mut out).unwrap();
        }
        // Packet 4 lost; rebuild it from packet 5, then decode 5 normally
        decoder.recover(&packets[5], &mut out).unwrap();
        decoder.decode(&packets[5], &mut out).unwrap();

        let stats = decoder.stats();
        assert_eq!(stats.frames_decoded, 5);
        assert_eq!(stats.frames_recovered + stats.frames_concealed, 1);
    }

    #[test]
    fn test_recover_without_fec_conceals() {
        let (_, mut decoder) = codec_pair(ConcealmentPolicy::Native, false);
        let clock = *decoder.clock();
        let mut out = AudioFrame::silence(&clock);
        assert!(!decoder.recover(&[0u8; 10], &mut out).unwrap());
        assert_eq!(decoder.stats().frames_concealed, 1);
    }

    #[test]
    fn test_garbage_payload_is_an_error() {
        let clock = FrameClock::default();
        let mut decoder = OpusDecoder::new(clock, ConcealmentPolicy::Native, false).unwrap();
        let mut out = AudioFrame::silence(&clock);
        // TOC byte for a 120 ms code-3 packet with an impossible frame count
        assert!(decoder.decode(&[0xFF, 0xFF, 0xFF], &mut out).is_err());
    }

    #[test]
    fn test_wrong_output_size() {
        let clock = FrameClock::default();
        let mut decoder = OpusDecoder::new(clock, ConcealmentPolicy::Native, false).unwrap();
        let mut out = AudioFrame::new(vec![0.0; 100], 2, 0);
        assert!(matches!(
            decoder.conceal(&mut out),
            Err(CodecError::InvalidFrameSize(100))
        ));
    }
}
