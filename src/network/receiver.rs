//! Inbound receive loop
//!
//! Runs on its own thread, blocking in `recv_from` with a short timeout.
//! Valid packets go into the playout inbox; everything else is counted and
//! dropped here.

use bytes::Bytes;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::audio::buffer::SharedRingBuffer;
use crate::clock::FrameClock;
use crate::error::NetworkError;
use crate::network::udp::{bind_receive_socket, is_transient};
use crate::protocol::{decode_packet, Packet};
use crate::stats::StatsCollector;

/// Large enough to see (and reject) datagrams above the packet limit
const RECV_BUFFER_SIZE: usize = 4096;

/// Transit differences above this are a clock or stream discontinuity
const MAX_TRANSIT_STEP_US: i64 = 1_000_000;

/// RFC 3550 interarrival jitter, in microseconds
#[derive(Debug, Default)]
pub struct JitterEstimator {
    last_transit: Option<i64>,
    jitter: f64,
}

impl JitterEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one arrival. `arrival_us` is local time since any fixed origin,
    /// `timestamp_ms` the sender's header timestamp.
    pub fn update(&mut self, arrival_us: i64, timestamp_ms: u32) -> f64 {
        let transit = arrival_us - timestamp_ms as i64 * 1000;
        if let Some(last) = self.last_transit {
            let d = (transit - last).abs();
            if d < MAX_TRANSIT_STEP_US {
                self.jitter += (d as f64 - self.jitter) / 16.0;
            }
        }
        self.last_transit = Some(transit);
        self.jitter
    }

    pub fn jitter_us(&self) -> f64 {
        self.jitter
    }
}

/// Owns the inbound socket and its receive thread
pub struct PacketReceiver {
    socket: Option<UdpSocket>,
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl PacketReceiver {
    /// Bind the local port. The read timeout is half a frame, so `stop()`
    /// returns within one frame period.
    pub fn bind(port: u16, clock: &FrameClock) -> Result<Self, NetworkError> {
        let socket = bind_receive_socket(port, clock.frame_duration() / 2)?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| NetworkError::ReceiveFailed(e.to_string()))?;

        Ok(Self {
            socket: Some(socket),
            local_addr,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Start the receive thread, delivering packets into `inbox`
    pub fn start(&mut self, inbox: SharedRingBuffer<Packet>, stats: Arc<StatsCollector>) -> Result<(), NetworkError> {
        let socket = self
            .socket
            .take()
            .ok_or_else(|| NetworkError::ReceiveFailed("receiver already started".into()))?;

        let running = self.running.clone();
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("udp-receive".to_string())
            .spawn(move || {
                receive_loop(&socket, &inbox, &stats, &running);
                running.store(false, Ordering::SeqCst);
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                NetworkError::ReceiveFailed(e.to_string())
            })?;

        self.thread_handle = Some(handle);
        tracing::info!("Receiving on {}", self.local_addr);
        Ok(())
    }

    /// Stop the thread; the socket closes when it exits
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
        self.socket = None;
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for PacketReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_packet(datagram: &[u8]) -> Result<Packet, NetworkError> {
    Ok(decode_packet(Bytes::copy_from_slice(datagram))?)
}

/// Count a valid datagram of `len` bytes and queue its packet for playout
pub(crate) fn deliver(inbox: &SharedRingBuffer<Packet>, stats: &StatsCollector, packet: Packet, len: usize) {
    stats.record_received(len);
    if inbox.force_push(packet).is_some() {
        // Playout stalled; the oldest queued packet makes room
        stats.record_dropped(1);
    }
}

fn receive_loop(
    socket: &UdpSocket,
    inbox: &SharedRingBuffer<Packet>,
    stats: &StatsCollector,
    running: &AtomicBool,
) {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    let mut estimator = JitterEstimator::new();
    let origin = Instant::now();
    let mut last_source: Option<SocketAddr> = None;

    while running.load(Ordering::Relaxed) {
        let (len, from) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e) if is_transient(&e) => continue,
            Err(e) => {
                if running.load(Ordering::Relaxed) {
                    tracing::error!("Receive socket failed, stopping inbound stream: {}", e);
                }
                break;
            }
        };

        let packet = match read_packet(&buf[..len]) {
            Ok(packet) => packet,
            Err(e) => {
                stats.record_malformed();
                tracing::trace!("Dropping datagram from {}: {}", from, e);
                continue;
            }
        };

        if last_source != Some(from) {
            tracing::info!("Receiving audio from {}", from);
            last_source = Some(from);
        }

        let jitter = estimator.update(origin.elapsed().as_micros() as i64, packet.timestamp);
        stats.set_jitter_us(jitter as u64);
        deliver(inbox, stats, packet, len);
    }

    tracing::debug!("Receive loop exited");
}
