//! Outbound packet framing

use bytes::BytesMut;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Instant;

use crate::clock::FrameClock;
use crate::constants::MAX_PACKET_SIZE;
use crate::error::NetworkError;
use crate::network::udp::create_send_socket;
use crate::protocol::{encode_packet, PacketHeader};
use crate::stats::StatsCollector;

/// Frames payloads and sends one datagram per frame
pub struct PacketSender {
    socket: UdpSocket,
    peer: SocketAddr,
    clock: FrameClock,
    start: Instant,
    sequence: u32,
    /// Serialization buffer (reused to avoid allocations)
    buffer: BytesMut,
    stats: Arc<StatsCollector>,
}

impl PacketSender {
    pub fn new(peer: SocketAddr, clock: FrameClock, stats: Arc<StatsCollector>) -> Result<Self, NetworkError> {
        let socket = create_send_socket(peer)?;
        tracing::info!("Sending to {}", peer);
        Ok(Self::with_socket(socket, peer, clock, stats))
    }

    pub fn with_socket(socket: UdpSocket, peer: SocketAddr, clock: FrameClock, stats: Arc<StatsCollector>) -> Self {
        Self {
            socket,
            peer,
            clock,
            start: Instant::now(),
            sequence: 0,
            buffer: BytesMut::with_capacity(MAX_PACKET_SIZE),
            stats,
        }
    }

    /// Send one payload. Every call consumes a sequence number, so a frame
    /// that fails here looks like any other loss to the receiver. Failures
    /// are counted and returned but never retried.
    pub fn send(&mut self, payload: &[u8]) -> Result<u32, NetworkError> {
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);

        let header = PacketHeader {
            sequence,
            timestamp: self.clock.timestamp_ms(self.start),
        };

        if let Err(e) = encode_packet(header, payload, &mut self.buffer) {
            self.stats.record_send_error();
            return Err(e);
        }

        match self.socket.send_to(&self.buffer, self.peer) {
            Ok(sent) => {
                self.stats.record_sent(sent);
                Ok(sequence)
            }
            Err(e) => {
                self.stats.record_send_error();
                if e.kind() == io::ErrorKind::WouldBlock {
                    tracing::trace!("Send buffer full, dropping frame {}", sequence);
                } else {
                    tracing::debug!("Send to {} failed: {}", self.peer, e);
                }
                Err(NetworkError::SendFailed(e.to_string()))
            }
        }
    }

    /// Sequence the next packet will carry
    pub fn next_sequence(&self) -> u32 {
        self.sequence
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}
