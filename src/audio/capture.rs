//! Audio capture
//!
//! The cpal stream lives on its own thread (streams are not `Send`) and is
//! dropped when that thread exits. The device callback slices whatever block
//! size the host delivers into whole frames and hands each one to the sink.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::AudioFrame;
use crate::clock::FrameClock;
use crate::error::AudioError;

/// How long a device gets to report that its stream is running
pub(crate) const START_TIMEOUT: Duration = Duration::from_secs(3);

/// Receives every complete captured frame, on the audio thread
pub type FrameSink = Box<dyn FnMut(&AudioFrame) + Send>;

/// A running source of PCM frames
pub trait Capturer: Send {
    /// Start delivering frames to `sink`. Returns once the device is running.
    fn start(&mut self, sink: FrameSink) -> Result<(), AudioError>;

    /// Stop delivery and release the device. Idempotent.
    fn stop(&mut self);

    fn is_running(&self) -> bool;

    /// Most recent stream error, if any
    fn check_errors(&self) -> Option<AudioError>;
}

/// Capture from a cpal input (or loopback) device
pub struct CpalCapturer {
    device: Option<cpal::Device>,
    device_id: String,
    config: cpal::StreamConfig,
    format: SampleFormat,
    clock: FrameClock,

    /// Whether capture is running
    running: Arc<AtomicBool>,

    /// Stream thread handle
    thread_handle: Option<JoinHandle<()>>,

    /// Channel for stream errors
    error_rx: Option<Receiver<AudioError>>,

    /// Total frames delivered
    frames_captured: Arc<AtomicU64>,
}

impl CpalCapturer {
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
            frames_captured: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Get total frames captured
    pub fn frames_captured(&self) -> u64 {
        self.frames_captured.load(Ordering::Relaxed)
    }
}

impl Capturer for CpalCapturer {
    fn start(&mut self, sink: FrameSink) -> Result<(), AudioError> {
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
        let frames_captured = self.frames_captured.clone();
        let config = self.config.clone();
        let format = self.format;
        let clock = self.clock;

        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let stream = match format {
                    SampleFormat::I16 => build_input::<i16>(
                        &device,
                        &config,
                        clock,
                        sink,
                        frames_captured,
                        running.clone(),
                        error_tx,
                    ),
                    _ => build_input::<f32>(
                        &device,
                        &config,
                        clock,
                        sink,
                        frames_captured,
                        running.clone(),
                        error_tx,
                    ),
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

                // Keep thread alive while running
                while running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }

                drop(stream);
                tracing::debug!("Capture stream closed");
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.thread_handle = Some(handle);

        match ready_rx.recv_timeout(START_TIMEOUT) {
            Ok(Ok(())) => {
                tracing::info!("Capture started on {}", self.device_id);
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

impl Drop for CpalCapturer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    clock: FrameClock,
    mut sink: FrameSink,
    frames_captured: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    error_tx: Sender<AudioError>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let mut assembler = FrameAssembler::new(clock);
    let running_for_errors = running.clone();

    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            if !running.load(Ordering::Relaxed) {
                return;
            }
            assembler.push(data.iter().map(|s| s.to_sample::<f32>()), |frame| {
                frames_captured.fetch_add(1, Ordering::Relaxed);
                sink(frame);
            });
        },
        move |err| {
            tracing::error!("Capture stream error: {}", err);
            if matches!(err, cpal::StreamError::DeviceNotAvailable) {
                running_for_errors.store(false, Ordering::SeqCst);
            }
            let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
        },
        None,
    )?;

    Ok(stream)
}

/// Collects host-sized blocks into whole frames
pub(crate) struct FrameAssembler {
    frame: AudioFrame,
    filled: usize,
}

impl FrameAssembler {
    pub(crate) fn new(clock: FrameClock) -> Self {
        Self {
            frame: AudioFrame::silence(&clock),
            filled: 0,
        }
    }

    /// Append samples; `on_frame` runs for every frame completed
    pub(crate) fn push<I, F>(&mut self, samples: I, mut on_frame: F)
    where
        I: IntoIterator<Item = f32>,
        F: FnMut(&AudioFrame),
    {
        let len = self.frame.samples.len();
        for sample in samples {
            self.frame.samples[self.filled] = sample;
            self.filled += 1;
            if self.filled == len {
                on_frame(&self.frame);
                self.frame.index += 1;
                self.filled = 0;
            }
        }
    }
}
