//! Send direction: capture → encode → send
//!
//! The capture callback only copies samples into a pooled buffer and offers
//! it to a bounded channel. Encoding and socket I/O happen on the
//! `encode-send` worker.

use crossbeam_channel::{bounded, RecvTimeoutError, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::audio::buffer::{AudioFrame, FramePool};
use crate::audio::capture::{Capturer, FrameSink};
use crate::clock::FrameClock;
use crate::codec::AudioEncoder;
use crate::constants::CAPTURE_QUEUE_CAPACITY;
use crate::error::{AudioError, Error};
use crate::network::PacketSender;
use crate::stats::StatsCollector;

pub struct Outbound {
    capturer: Box<dyn Capturer>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Outbound {
    /// Start the worker, then the capture device
    pub fn start(
        clock: FrameClock,
        mut capturer: Box<dyn Capturer>,
        mut encoder: Box<dyn AudioEncoder>,
        mut sender: PacketSender,
        stats: Arc<StatsCollector>,
    ) -> Result<Self, Error> {
        // Every buffer in flight plus one being filled and one being encoded
        let pool = Arc::new(FramePool::new(CAPTURE_QUEUE_CAPACITY + 2, clock.samples_per_frame()));
        let (frame_tx, frame_rx) = bounded::<AudioFrame>(CAPTURE_QUEUE_CAPACITY);
        let running = Arc::new(AtomicBool::new(true));

        let worker = {
            let pool = pool.clone();
            let stats = stats.clone();
            let running = running.clone();
            let tick = clock.frame_duration();

            thread::Builder::new()
                .name("encode-send".to_string())
                .spawn(move || {
                    while running.load(Ordering::Relaxed) {
                        let frame = match frame_rx.recv_timeout(tick) {
                            Ok(frame) => frame,
                            Err(RecvTimeoutError::Timeout) => continue,
                            Err(RecvTimeoutError::Disconnected) => {
                                tracing::warn!("Capture ended, stopping outbound stream");
                                break;
                            }
                        };

                        match encoder.encode(&frame) {
                            Ok(payload) => {
                                stats.record_encoded();
                                // Failures are counted by the sender
                                let _ = sender.send(&payload);
                            }
                            Err(e) => {
                                stats.record_encode_error();
                                tracing::debug!("Dropping frame {}: {}", frame.index, e);
                            }
                        }

                        pool.recycle(frame.samples);
                    }
                    running.store(false, Ordering::SeqCst);
                })
                .map_err(|e| AudioError::StreamError(e.to_string()))?
        };

        let sink: FrameSink = {
            let stats = stats.clone();
            Box::new(move |frame: &AudioFrame| {
                stats.record_captured();

                let mut samples = pool.take();
                if samples.len() == frame.samples.len() {
                    samples.copy_from_slice(&frame.samples);
                } else {
                    // Wrong geometry; the encoder rejects it
                    samples.clear();
                    samples.extend_from_slice(&frame.samples);
                }

                let copy = AudioFrame::new(samples, frame.channels, frame.index);
                match frame_tx.try_send(copy) {
                    Ok(()) => {}
                    Err(TrySendError::Full(copy)) | Err(TrySendError::Disconnected(copy)) => {
                        stats.record_capture_overrun();
                        pool.recycle(copy.samples);
                    }
                }
            })
        };

        if let Err(e) = capturer.start(sink) {
            running.store(false, Ordering::SeqCst);
            let _ = worker.join();
            return Err(e.into());
        }

        Ok(Self {
            capturer,
            running,
            worker: Some(worker),
        })
    }

    /// Capture is delivering and the worker is alive
    pub fn is_active(&self) -> bool {
        self.running.load(Ordering::SeqCst) && self.capturer.is_running()
    }

    pub fn stop(&mut self) {
        self.capturer.stop();
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for Outbound {
    fn drop(&mut self) {
        self.stop();
    }
}
