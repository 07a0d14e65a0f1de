//! Test doubles shared by the integration tests

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::HashSet;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use lan_audio_link::audio::{AudioBackend, AudioFrame, Capturer, FrameSink, FrameSource, Playback};
use lan_audio_link::error::AudioError;
use lan_audio_link::protocol::{decode_packet, AudioDeviceInfo};
use lan_audio_link::FrameClock;

/// Devices driven by the test itself: it pushes captured frames and pulls
/// playback frames whenever it likes.
#[derive(Clone, Default)]
pub struct ManualBackend {
    sink: Arc<Mutex<Option<FrameSink>>>,
    source: Arc<Mutex<Option<FrameSource>>>,
    capture_running: Arc<AtomicBool>,
    playback_running: Arc<AtomicBool>,
}

impl ManualBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver one captured frame. False if capture is not running.
    pub fn capture(&self, frame: &AudioFrame) -> bool {
        match self.sink.lock().as_mut() {
            Some(sink) => {
                sink(frame);
                true
            }
            None => false,
        }
    }

    /// Ask playback for one frame. `None` if playback is not running.
    pub fn pull(&self, out: &mut AudioFrame) -> Option<()> {
        self.source.lock().as_mut().map(|source| source(out))
    }

    /// Simulate the capture device disappearing
    pub fn unplug_capture(&self) {
        self.capture_running.store(false, Ordering::SeqCst);
        self.sink.lock().take();
    }
}

impl AudioBackend for ManualBackend {
    fn list_capture_devices(&self) -> Result<Vec<AudioDeviceInfo>, AudioError> {
        Ok(Vec::new())
    }

    fn list_playback_devices(&self) -> Result<Vec<AudioDeviceInfo>, AudioError> {
        Ok(Vec::new())
    }

    fn open_capture(&self, _id: Option<&str>, _clock: &FrameClock) -> Result<Box<dyn Capturer>, AudioError> {
        Ok(Box::new(ManualCapturer(self.clone())))
    }

    fn open_playback(&self, _id: Option<&str>, _clock: &FrameClock) -> Result<Box<dyn Playback>, AudioError> {
        Ok(Box::new(ManualPlayback(self.clone())))
    }
}

struct ManualCapturer(ManualBackend);

impl Capturer for ManualCapturer {
    fn start(&mut self, sink: FrameSink) -> Result<(), AudioError> {
        *self.0.sink.lock() = Some(sink);
        self.0.capture_running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        self.0.unplug_capture();
    }

    fn is_running(&self) -> bool {
        self.0.capture_running.load(Ordering::SeqCst)
    }

    fn check_errors(&self) -> Option<AudioError> {
        None
    }
}

struct ManualPlayback(ManualBackend);

impl Playback for ManualPlayback {
    fn start(&mut self, source: FrameSource) -> Result<(), AudioError> {
        *self.0.source.lock() = Some(source);
        self.0.playback_running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        self.0.playback_running.store(false, Ordering::SeqCst);
        self.0.source.lock().take();
    }

    fn is_running(&self) -> bool {
        self.0.playback_running.load(Ordering::SeqCst)
    }

    fn check_errors(&self) -> Option<AudioError> {
        None
    }
}

/// UDP forwarder that discards chosen sequence numbers
pub struct LossyRelay {
    addr: SocketAddr,
    handled: Arc<AtomicU64>,
    forwarded: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl LossyRelay {
    pub fn start(target: SocketAddr, drop: HashSet<u32>) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_read_timeout(Some(Duration::from_millis(20))).unwrap();
        let addr = socket.local_addr().unwrap();

        let handled = Arc::new(AtomicU64::new(0));
        let forwarded = Arc::new(AtomicU64::new(0));
        let running = Arc::new(AtomicBool::new(true));

        let handle = {
            let handled = handled.clone();
            let forwarded = forwarded.clone();
            let running = running.clone();
            thread::spawn(move || {
                let mut buf = [0u8; 2048];
                while running.load(Ordering::Relaxed) {
                    let Ok(len) = socket.recv(&mut buf) else {
                        continue;
                    };
                    let datagram = &buf[..len];
                    let sequence = decode_packet(Bytes::copy_from_slice(datagram))
                        .map(|p| p.sequence)
                        .ok();
                    if !sequence.is_some_and(|seq| drop.contains(&seq)) {
                        socket.send_to(datagram, target).unwrap();
                        forwarded.fetch_add(1, Ordering::SeqCst);
                    }
                    handled.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        Self {
            addr,
            handled,
            forwarded,
            running,
            handle: Some(handle),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Datagrams seen, forwarded or not
    pub fn handled(&self) -> u64 {
        self.handled.load(Ordering::SeqCst)
    }

    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::SeqCst)
    }
}

impl Drop for LossyRelay {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// A free UDP port on this host
pub fn free_port() -> u16 {
    UdpSocket::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}
