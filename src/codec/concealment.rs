//! Packet loss concealment policies
//!
//! Used when a frame is missing and the decoder is told not to (or cannot)
//! extrapolate natively. The decoder still runs its own PLC underneath so its
//! internal state stays continuous for the next real packet.

use serde::{Deserialize, Serialize};

/// Gain multiplier per concealed frame for `SilenceFade`
const FADE_STEP: f32 = 0.5;

/// Gain multiplier per concealed frame for `RepeatLast`
const REPEAT_DECAY: f32 = 0.85;

/// Below this gain output is plain silence
const SILENCE_FLOOR: f32 = 0.01;

/// How a missing frame is synthesized
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcealmentPolicy {
    /// Codec extrapolation (Opus PLC); behaves like `SilenceFade` for codecs
    /// without native support
    #[default]
    Native,
    /// Last good frame, fading to silence over a few frames
    SilenceFade,
    /// Last good frame repeated at slowly decreasing gain
    RepeatLast,
    /// Zeros
    Silence,
}

/// Synthesizes substitute frames from the last good one
#[derive(Debug, Clone)]
pub struct Concealer {
    policy: ConcealmentPolicy,
    channels: usize,
    last: Vec<f32>,
    has_last: bool,
    gain: f32,
}

impl Concealer {
    pub fn new(policy: ConcealmentPolicy, channels: u16, frame_len: usize) -> Self {
        Self {
            policy,
            channels: channels.max(1) as usize,
            last: vec![0.0; frame_len],
            has_last: false,
            gain: 1.0,
        }
    }

    pub fn policy(&self) -> ConcealmentPolicy {
        self.policy
    }

    /// Remember a frame that was actually played
    pub fn observe(&mut self, frame: &[f32]) {
        if frame.len() == self.last.len() {
            self.last.copy_from_slice(frame);
            self.has_last = true;
            self.gain = 1.0;
        }
    }

    /// Fill `out` with a substitute for one missing frame
    pub fn fill(&mut self, out: &mut [f32]) {
        let step = match self.policy {
            ConcealmentPolicy::Native | ConcealmentPolicy::SilenceFade => FADE_STEP,
            ConcealmentPolicy::RepeatLast => REPEAT_DECAY,
            ConcealmentPolicy::Silence => 0.0,
        };

        if !self.has_last || self.gain < SILENCE_FLOOR || step == 0.0 || out.len() != self.last.len() {
            out.fill(0.0);
            return;
        }

        // Linear ramp from the current gain to the next one, per sample frame,
        // so consecutive concealed frames join without a step
        let from = self.gain;
        let to = if from * step < SILENCE_FLOOR { 0.0 } else { from * step };
        let frames = (out.len() / self.channels).max(1) as f32;

        for (i, (dst, src)) in out.iter_mut().zip(&self.last).enumerate() {
            let t = (i / self.channels) as f32 / frames;
            *dst = src * (from + (to - from) * t);
        }

        self.gain = to;
    }
}
