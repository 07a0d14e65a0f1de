//! # LAN Audio Link
//!
//! Low-latency two-way system audio streaming between two hosts on a LAN.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────── HOST A ─────────────────────────────────┐
//! │                                                                          │
//! │  OUTBOUND                                 INBOUND                        │
//! │  ┌────────────┐                           ┌────────────┐                 │
//! │  │  Capturer  │ loopback / mic            │  Playback  │ device callback │
//! │  │ (callback) │                           │ (callback) │ pulls 1 frame   │
//! │  └─────┬──────┘                           └─────▲──────┘                 │
//! │        │ bounded channel                        │ decode / conceal       │
//! │        ▼ (recycled buffers)                     │                        │
//! │  ┌────────────┐                           ┌─────┴──────┐                 │
//! │  │  Encoder   │ encode-send thread        │  Jitter    │ owned by the    │
//! │  │   (Opus)   │                           │  Buffer    │ playback side   │
//! │  └─────┬──────┘                           └─────▲──────┘                 │
//! │        ▼                                        │ lock-free ring         │
//! │  ┌────────────┐                           ┌─────┴──────┐                 │
//! │  │   Sender   │ [Magic|Seq|Ts|Len|Opus]   │  Receiver  │ udp-receive     │
//! │  └─────┬──────┘                           └─────▲──────┘ thread          │
//! └────────┼────────────────────────────────────────┼────────────────────────┘
//!          │ UDP → peer:send_port                   │ UDP ← :receive_port
//!          ▼                                        │
//!     ┌────────── HOST B runs the same two chains, mirrored ──────────┐
//!     └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! The two directions share nothing but the [`FrameClock`] geometry and the
//! [`stats::StatsCollector`] of their session.

pub mod audio;
pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod session;
pub mod stats;
pub mod ui;

pub use clock::FrameClock;
pub use error::{Error, Result};
pub use session::{get_stats, start_session, stop_session, SessionHandle};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for audio processing
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Default channel count (stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Samples per channel in one 20 ms frame at 48 kHz
    pub const DEFAULT_FRAME_SAMPLES: usize = 960;

    /// Default Opus bitrate in bits per second
    pub const DEFAULT_BITRATE: u32 = 64_000;

    /// Default peer address
    pub const DEFAULT_PEER_ADDRESS: &str = "192.168.1.100";

    /// Default port the peer listens on
    pub const DEFAULT_SEND_PORT: u16 = 5001;

    /// Default local listening port
    pub const DEFAULT_RECEIVE_PORT: u16 = 5002;

    /// Default HTTP port for the control API
    pub const DEFAULT_HTTP_PORT: u16 = 8080;

    /// Frames buffered before playout starts (60 ms)
    pub const DEFAULT_TARGET_DEPTH: usize = 3;

    /// Maximum buffered frames before the oldest are evicted
    pub const DEFAULT_MAX_DEPTH: usize = 16;

    /// Missing frames in a row before the jitter buffer refills
    pub const DEFAULT_RESYNC_THRESHOLD: u32 = 10;

    /// Sequence distance treated as a restarted stream
    pub const DEFAULT_RESTART_THRESHOLD: u32 = 1000;

    /// Maximum packet size for UDP
    pub const MAX_PACKET_SIZE: usize = 1472; // MTU - IP/UDP headers

    /// Capture → encoder handoff capacity (in frames)
    pub const CAPTURE_QUEUE_CAPACITY: usize = 8;

    /// Receiver → playout handoff capacity (in packets)
    pub const INBOX_CAPACITY: usize = 64;

    /// Kernel socket buffer size
    pub const SOCKET_BUFFER_SIZE: usize = 256 * 1024;
}
