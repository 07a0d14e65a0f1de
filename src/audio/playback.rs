//! Audio playback
//!
//! Pull model: the device callback asks the frame source for one whole frame
//! each time it has consumed the previous one, whatever block size the host
//! requests. The source must never block.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::AudioFrame;
use crate::audio::capture::START_TIMEOUT;
use crate::clock::FrameClock;
use crate::error::AudioError;

/// Fills the next frame to play, on the audio thread
pub type FrameSource = Box<dyn FnMut(&mut AudioFrame) + Send>;

/// A running sink for PCM frames
pub trait Playback: Send {
    /// Start pulling frames from `source`. Returns once the device is running.
    fn start(&mut self, source: FrameSource) -> Result<(), AudioError>;

    /// Stop pulling and release the device. Idempotent.
    fn stop(&mut self);

    fn is_running(&self) -> bool;

    /// Most recent stream error, if any
    fn check_errors(&self) -> Option<AudioError>;
}

/// Playback on a cpal output device
pub struct CpalPlayback {
    device: Option<cpal::Device>,
    device_id: String,
    config: cpal::StreamConfig,
    format: SampleFormat,
    clock: FrameClock,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Option<Receiver<AudioError>>,
}

impl CpalPlayback {
    pub fn new(
        device: cpal::Device,
        device_id: String,
        config: cpal::StreamConfig,
        format: SampleFormat,
        clock: FrameClock,
    ) -> Self {
        Self {
            device: Some(device),
            device_id,
            config,
            format,
            clock,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            error_rx: None,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}

impl Playback for CpalPlayback {
    fn start(&mut self, source: FrameSource) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = self
            .device
            .take()
            .ok_or_else(|| AudioError::StreamError(format!("{} was already used", self.device_id)))?;

        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        self.error_rx = Some(error_rx);

        let running = self.running.clone();
        let config = self.config.clone();
        let format = self.format;
        let clock = self.clock;

        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("audio-playback".to_string())
            .spawn(move || {
                let cursor = FrameCursor::new(clock, source);
                let stream = match format {
                    SampleFormat::I16 => build_output::<i16>(&device, &config, cursor, running.clone(), error_tx),
                    _ => build_output::<f32>(&device, &config, cursor, running.clone(), error_tx),
                };

                let stream = match stream.and_then(|s| s.play().map(|_| s).map_err(AudioError::from)) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        running.store(false, Ordering::SeqCst);
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                while running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }

                drop(stream);
                tracing::debug!("Playback stream closed");
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.thread_handle = Some(handle);

        match ready_rx.recv_timeout(START_TIMEOUT) {
            Ok(Ok(())) => {
                tracing::info!("Playback started on {}", self.device_id);
                Ok(())
            }
            Ok(Err(e)) => {
                self.stop();
                Err(e)
            }
            Err(_) => {
                self.stop();
                Err(AudioError::StartTimeout(START_TIMEOUT.as_millis() as u64))
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
        self.error_rx.as_ref().and_then(|rx| rx.try_recv().ok())
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut cursor: FrameCursor,
    running: Arc<AtomicBool>,
    error_tx: Sender<AudioError>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<f32>,
{
    let running_for_errors = running.clone();

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            if !running.load(Ordering::Relaxed) {
                data.fill(T::EQUILIBRIUM);
                return;
            }
            cursor.fill(data.iter_mut(), |out, sample| *out = sample.clamp(-1.0, 1.0).to_sample::<T>());
        },
        move |err| {
            tracing::error!("Playback stream error: {}", err);
            if matches!(err, cpal::StreamError::DeviceNotAvailable) {
                running_for_errors.store(false, Ordering::SeqCst);
            }
            let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
        },
        None,
    )?;

    Ok(stream)
}

/// Read position inside the frame currently being played
pub(crate) struct FrameCursor {
    frame: AudioFrame,
    position: usize,
    source: FrameSource,
}

impl FrameCursor {
    pub(crate) fn new(clock: FrameClock, source: FrameSource) -> Self {
        let frame = AudioFrame::silence(&clock);
        // Start exhausted so the first request pulls a frame
        let position = frame.samples.len();
        Self {
            frame,
            position,
            source,
        }
    }

    /// Write one sample into each slot, pulling new frames as needed
    pub(crate) fn fill<'a, O, I, W>(&mut self, slots: I, mut write: W)
    where
        O: 'a,
        I: IntoIterator<Item = &'a mut O>,
        W: FnMut(&mut O, f32),
    {
        for slot in slots {
            if self.position >= self.frame.samples.len() {
                (self.source)(&mut self.frame);
                self.position = 0;
            }
            write(slot, self.frame.samples[self.position]);
            self.position += 1;
        }
    }
}
