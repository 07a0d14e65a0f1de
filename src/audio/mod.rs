//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod device;
pub mod jitter;
pub mod playback;
pub mod synthetic;

pub use buffer::{AudioFrame, FramePool, RingBuffer, SharedRingBuffer};
pub use capture::{Capturer, CpalCapturer, FrameSink};
pub use device::{AudioBackend, CpalBackend};
pub use jitter::{JitterBuffer, JitterState, Offer, Playout};
pub use playback::{CpalPlayback, FrameSource, Playback};
pub use synthetic::SyntheticBackend;
