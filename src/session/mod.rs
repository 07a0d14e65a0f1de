//! Streaming sessions
//!
//! A session runs both directions for one peer: outbound (capture → encode →
//! send) and inbound (receive → jitter buffer → decode → playback). The two
//! share nothing but the configuration they were started with and the
//! session's [`StatsCollector`]. Either direction can fail on its own; the
//! other keeps running.

mod inbound;
mod outbound;

pub use inbound::{FrameKind, Inbound, PlayoutEngine};
pub use outbound::Outbound;

use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;

use crate::audio::device::AudioBackend;
use crate::codec::{OpusDecoder, OpusEncoder};
use crate::config::{OpusConfig, StreamConfig};
use crate::error::Result;
use crate::network::{PacketReceiver, PacketSender};
use crate::stats::{StatsCollector, StatsSnapshot};

/// A running session. Dropping it stops both directions.
pub struct SessionHandle {
    id: Uuid,
    started_at: DateTime<Utc>,
    config: StreamConfig,
    receive_addr: SocketAddr,
    stats: Arc<StatsCollector>,
    outbound: Option<Outbound>,
    inbound: Option<Inbound>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Configuration the session was started with
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Local address inbound packets are received on
    pub fn receive_addr(&self) -> SocketAddr {
        self.receive_addr
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_outbound_active(&self) -> bool {
        self.outbound.as_ref().is_some_and(Outbound::is_active)
    }

    pub fn is_inbound_active(&self) -> bool {
        self.inbound.as_ref().is_some_and(Inbound::is_active)
    }

    /// Either direction still running
    pub fn is_running(&self) -> bool {
        self.is_outbound_active() || self.is_inbound_active()
    }

    /// Stop both directions and release devices and sockets. Idempotent.
    pub fn stop(&mut self) {
        if self.outbound.is_none() && self.inbound.is_none() {
            return;
        }

        if let Some(mut outbound) = self.outbound.take() {
            outbound.stop();
        }
        if let Some(mut inbound) = self.inbound.take() {
            inbound.stop();
        }

        let stats = self.stats.snapshot();
        tracing::info!(
            "Session {} stopped: sent {}, received {}, lost {}, late {}, concealed {}",
            self.id,
            stats.packets_sent,
            stats.packets_received,
            stats.packets_lost,
            stats.packets_late,
            stats.frames_concealed
        );
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("started_at", &self.started_at)
            .field("receive_addr", &self.receive_addr)
            .field("outbound_active", &self.is_outbound_active())
            .field("inbound_active", &self.is_inbound_active())
            .finish()
    }
}

/// Start streaming in both directions.
///
/// Sockets are bound before any device is opened. On any failure everything
/// already started is stopped again before the error is returned, so a
/// failed start leaves nothing running.
pub fn start_session(config: StreamConfig, backend: &dyn AudioBackend) -> Result<SessionHandle> {
    config.validate()?;
    let clock = config.clock();
    let peer = config.peer_addr()?;
    let stats = Arc::new(StatsCollector::new());

    let receiver = PacketReceiver::bind(config.receive_port, &clock)?;
    let receive_addr = receiver.local_addr();
    let sender = PacketSender::new(peer, clock, stats.clone())?;

    let encoder = OpusEncoder::new(OpusConfig::for_stream(&config))?;
    let decoder = OpusDecoder::new(clock, config.concealment, config.fec)?;

    let playback = backend.open_playback(config.output_device.as_deref(), &clock)?;
    let capturer = backend.open_capture(config.input_device.as_deref(), &clock)?;

    let inbound = Inbound::start(&config, receiver, playback, Box::new(decoder), stats.clone())?;
    // A failure here drops `inbound`, which stops it
    let outbound = Outbound::start(clock, capturer, Box::new(encoder), sender, stats.clone())?;

    let handle = SessionHandle {
        id: Uuid::new_v4(),
        started_at: Utc::now(),
        config,
        receive_addr,
        stats,
        outbound: Some(outbound),
        inbound: Some(inbound),
    };

    tracing::info!(
        "Session {} started: sending to {}, receiving on {} ({} Hz, {} ch, {:.1} ms frames, {} bps)",
        handle.id,
        peer,
        receive_addr,
        clock.sample_rate,
        clock.channels,
        clock.frame_duration_ms(),
        handle.config.bitrate
    );

    Ok(handle)
}

/// Stop a session. Calling it again is harmless.
pub fn stop_session(handle: &mut SessionHandle) {
    handle.stop();
}

/// Current counters of a session
pub fn get_stats(handle: &SessionHandle) -> StatsSnapshot {
    handle.stats()
}
