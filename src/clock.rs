//! Frame timing shared by every pipeline stage
//!
//! A frame is a fixed slice of time (20 ms by default). Capture, codec,
//! wire sequence numbers and playback all agree on frame boundaries through
//! this one value.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_CHANNELS, DEFAULT_FRAME_SAMPLES, DEFAULT_SAMPLE_RATE};
use crate::error::Error;

/// Frame durations (in tenths of a millisecond) Opus can encode
const OPUS_FRAME_DURATIONS_TENTH_MS: [u32; 6] = [25, 50, 100, 200, 400, 600];

/// Sample geometry and cadence of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameClock {
    /// Samples per second, per channel
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
    /// Samples per channel in one frame
    pub frame_samples: usize,
}

impl Default for FrameClock {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            frame_samples: DEFAULT_FRAME_SAMPLES,
        }
    }
}

impl FrameClock {
    pub fn new(sample_rate: u32, channels: u16, frame_samples: usize) -> Self {
        Self {
            sample_rate,
            channels,
            frame_samples,
        }
    }

    /// Total interleaved samples in one frame
    pub fn samples_per_frame(&self) -> usize {
        self.frame_samples * self.channels as usize
    }

    /// Wall-clock length of one frame
    pub fn frame_duration(&self) -> Duration {
        Duration::from_micros(self.frame_samples as u64 * 1_000_000 / self.sample_rate.max(1) as u64)
    }

    /// Frame length in milliseconds
    pub fn frame_duration_ms(&self) -> f32 {
        self.frame_samples as f32 * 1000.0 / self.sample_rate.max(1) as f32
    }

    /// Wire timestamp: milliseconds since `start`, wrapping at 2^32
    pub fn timestamp_ms(&self, start: Instant) -> u32 {
        start.elapsed().as_millis() as u64 as u32
    }

    /// Check that the geometry is something the codec and devices can run
    pub fn validate(&self) -> Result<(), Error> {
        if !matches!(self.sample_rate, 8000 | 12000 | 16000 | 24000 | 48000) {
            return Err(Error::Config(format!(
                "Unsupported sample rate: {}",
                self.sample_rate
            )));
        }

        if !(1..=2).contains(&self.channels) {
            return Err(Error::Config(format!(
                "Unsupported channel count: {}",
                self.channels
            )));
        }

        // Exact integer check: frame_samples / sample_rate in units of 0.1 ms
        let tenth_ms = self.frame_samples as u64 * 10_000;
        let legal = tenth_ms % self.sample_rate as u64 == 0
            && OPUS_FRAME_DURATIONS_TENTH_MS.contains(&((tenth_ms / self.sample_rate as u64) as u32));
        if !legal {
            return Err(Error::Config(format!(
                "{} samples at {} Hz is not a valid Opus frame duration",
                self.frame_samples, self.sample_rate
            )));
        }

        Ok(())
    }
}
