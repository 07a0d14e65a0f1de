//! Device-free backend
//!
//! A sine tone stands in for system audio and playback throws frames away,
//! both ticking at the frame clock. Used for headless hosts (`--synthetic`)
//! and for driving whole sessions in tests.

use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::audio::buffer::AudioFrame;
use crate::audio::capture::{Capturer, FrameSink};
use crate::audio::device::AudioBackend;
use crate::audio::playback::{FrameSource, Playback};
use crate::clock::FrameClock;
use crate::error::AudioError;
use crate::protocol::AudioDeviceInfo;

pub const TONE_DEVICE_ID: &str = "synthetic:tone";
pub const NULL_DEVICE_ID: &str = "synthetic:null";

/// Tone frequency in Hz
const TONE_HZ: f32 = 440.0;
const TONE_AMPLITUDE: f32 = 0.25;

#[derive(Debug, Clone, Copy, Default)]
pub struct SyntheticBackend;

impl SyntheticBackend {
    pub fn new() -> Self {
        Self
    }

    fn info(id: &str, name: &str, is_input: bool) -> AudioDeviceInfo {
        AudioDeviceInfo {
            id: id.to_string(),
            name: name.to_string(),
            is_input,
            is_output: !is_input,
            is_loopback: false,
            is_default: true,
            sample_rates: vec![8000, 12000, 16000, 24000, 48000],
            channels: vec![1, 2],
        }
    }

    fn check_id(id: Option<&str>, expected: &str) -> Result<(), AudioError> {
        match id {
            Some(id) if id != expected => Err(AudioError::DeviceNotFound(id.to_string())),
            _ => Ok(()),
        }
    }
}

impl AudioBackend for SyntheticBackend {
    fn list_capture_devices(&self) -> Result<Vec<AudioDeviceInfo>, AudioError> {
        Ok(vec![Self::info(TONE_DEVICE_ID, "Synthetic tone", true)])
    }

    fn list_playback_devices(&self) -> Result<Vec<AudioDeviceInfo>, AudioError> {
        Ok(vec![Self::info(NULL_DEVICE_ID, "Discard", false)])
    }

    fn open_capture(&self, id: Option<&str>, clock: &FrameClock) -> Result<Box<dyn Capturer>, AudioError> {
        Self::check_id(id, TONE_DEVICE_ID)?;
        Ok(Box::new(ToneCapturer::new(*clock)))
    }

    fn open_playback(&self, id: Option<&str>, clock: &FrameClock) -> Result<Box<dyn Playback>, AudioError> {
        Self::check_id(id, NULL_DEVICE_ID)?;
        Ok(Box::new(NullPlayback::new(*clock)))
    }
}

/// Runs `tick` once per frame period until `running` clears
fn spawn_paced<F>(name: &str, clock: FrameClock, running: Arc<AtomicBool>, mut tick: F) -> Result<JoinHandle<()>, AudioError>
where
    F: FnMut() + Send + 'static,
{
    let period = clock.frame_duration();
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let mut deadline = Instant::now();
            while running.load(Ordering::Relaxed) {
                tick();
                deadline += period;
                let now = Instant::now();
                if deadline > now {
                    thread::sleep(deadline - now);
                } else {
                    // Fell behind; don't try to catch up in a burst
                    deadline = now;
                }
            }
        })
        .map_err(|e| AudioError::StreamError(e.to_string()))
}

/// Generates a continuous sine tone
pub struct ToneCapturer {
    clock: FrameClock,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl ToneCapturer {
    pub fn new(clock: FrameClock) -> Self {
        Self {
            clock,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        }
    }
}

/// Fill `frame` with the tone, continuing the phase from earlier frames
pub fn render_tone(frame: &mut AudioFrame, clock: &FrameClock) {
    let channels = clock.channels.max(1) as usize;
    let start = frame.index * clock.frame_samples as u64;
    for (i, chunk) in frame.samples.chunks_mut(channels).enumerate() {
        let n = (start + i as u64) % clock.sample_rate as u64;
        let t = n as f32 / clock.sample_rate as f32;
        chunk.fill((2.0 * PI * TONE_HZ * t).sin() * TONE_AMPLITUDE);
    }
}

impl Capturer for ToneCapturer {
    fn start(&mut self, mut sink: FrameSink) -> Result<(), AudioError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let clock = self.clock;
        let mut frame = AudioFrame::silence(&clock);
        let handle = spawn_paced("synthetic-capture", clock, self.running.clone(), move || {
            render_tone(&mut frame, &clock);
            sink(&frame);
            frame.index += 1;
        });

        match handle {
            Ok(handle) => {
                self.thread_handle = Some(handle);
                tracing::info!("Synthetic capture started ({} Hz tone)", TONE_HZ);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn check_errors(&self) -> Option<AudioError> {
        None
    }
}

impl Drop for ToneCapturer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Pulls frames at the device rate and discards them
pub struct NullPlayback {
    clock: FrameClock,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl NullPlayback {
    pub fn new(clock: FrameClock) -> Self {
        Self {
            clock,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        }
    }
}

impl Playback for NullPlayback {
    fn start(&mut self, mut source: FrameSource) -> Result<(), AudioError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut frame = AudioFrame::silence(&self.clock);
        let handle = spawn_paced("synthetic-playback", self.clock, self.running.clone(), move || {
            source(&mut frame);
        });

        match handle {
            Ok(handle) => {
                self.thread_handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn check_errors(&self) -> Option<AudioError> {
        None
    }
}

impl Drop for NullPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}
