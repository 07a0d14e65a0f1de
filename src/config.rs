//! Configuration values
//!
//! `StreamConfig` is what a session runs with. It is cloned into each
//! direction at start and never mutated afterwards; edits made through the
//! control API only apply to the next session.

use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::clock::FrameClock;
use crate::codec::ConcealmentPolicy;
use crate::constants::*;
use crate::error::Error;

/// Jitter buffer tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JitterConfig {
    /// Frames buffered before playout starts
    pub target_depth: usize,
    /// Hard cap on buffered, unconsumed frames
    pub max_depth: usize,
    /// Consecutive missing frames tolerated before refilling
    pub resync_threshold: u32,
    /// Sequence jump (either direction) treated as a restarted stream
    pub restart_threshold: u32,
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            target_depth: DEFAULT_TARGET_DEPTH,
            max_depth: DEFAULT_MAX_DEPTH,
            resync_threshold: DEFAULT_RESYNC_THRESHOLD,
            restart_threshold: DEFAULT_RESTART_THRESHOLD,
        }
    }
}

/// Settings for one streaming session (both directions)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Address of the other host
    pub peer_address: String,
    /// Port the peer listens on; our outbound packets go here
    pub send_port: u16,
    /// Local port we listen on (0 = let the OS choose)
    pub receive_port: u16,
    /// Opus bitrate in bits per second
    pub bitrate: u32,
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per channel per frame
    pub frame_samples: usize,
    /// Capture device id (`None` = default loopback or input)
    pub input_device: Option<String>,
    /// Playback device id (`None` = default output)
    pub output_device: Option<String>,
    /// Playback gain, 0.0 - 1.0
    pub volume: f32,
    /// Opus in-band forward error correction
    pub fec: bool,
    /// Loss percentage the encoder plans FEC for
    pub expected_loss_percent: u8,
    pub concealment: ConcealmentPolicy,
    pub jitter: JitterConfig,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            peer_address: DEFAULT_PEER_ADDRESS.to_string(),
            send_port: DEFAULT_SEND_PORT,
            receive_port: DEFAULT_RECEIVE_PORT,
            bitrate: DEFAULT_BITRATE,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            frame_samples: DEFAULT_FRAME_SAMPLES,
            input_device: None,
            output_device: None,
            volume: 1.0,
            fec: false,
            expected_loss_percent: 5,
            concealment: ConcealmentPolicy::default(),
            jitter: JitterConfig::default(),
        }
    }
}

impl StreamConfig {
    /// Frame geometry for this session
    pub fn clock(&self) -> FrameClock {
        FrameClock::new(self.sample_rate, self.channels, self.frame_samples)
    }

    /// Where outbound packets are sent
    pub fn peer_addr(&self) -> Result<SocketAddr, Error> {
        let ip: IpAddr = self
            .peer_address
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("Invalid peer address: {}", self.peer_address)))?;
        Ok(SocketAddr::new(ip, self.send_port))
    }

    /// Reject settings a session cannot run with
    pub fn validate(&self) -> Result<(), Error> {
        self.clock().validate()?;
        self.peer_addr()?;

        if self.send_port == 0 {
            return Err(Error::Config("Send port must not be 0".into()));
        }

        if !(6_000..=510_000).contains(&self.bitrate) {
            return Err(Error::Config(format!("Bitrate out of range: {}", self.bitrate)));
        }

        if !(0.0..=1.0).contains(&self.volume) {
            return Err(Error::Config(format!("Volume out of range: {}", self.volume)));
        }

        if self.expected_loss_percent > 100 {
            return Err(Error::Config(format!(
                "Expected loss out of range: {}%",
                self.expected_loss_percent
            )));
        }

        let jitter = &self.jitter;
        if jitter.target_depth == 0 {
            return Err(Error::Config("Jitter target depth must be at least 1".into()));
        }
        if jitter.max_depth < jitter.target_depth {
            return Err(Error::Config(format!(
                "Jitter max depth {} is below target depth {}",
                jitter.max_depth, jitter.target_depth
            )));
        }
        if jitter.restart_threshold as usize <= jitter.max_depth {
            return Err(Error::Config(
                "Jitter restart threshold must exceed max depth".into(),
            ));
        }

        Ok(())
    }
}

/// Opus application mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpusApplication {
    Voip,
    Audio,
    LowDelay,
}

/// Encoder settings derived from a stream configuration
#[derive(Debug, Clone, PartialEq)]
pub struct OpusConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per channel per frame
    pub frame_size: usize,
    pub bitrate: u32,
    pub application: OpusApplication,
    pub vbr: bool,
    /// Constrained VBR (only meaningful with `vbr`)
    pub cvbr: bool,
    pub fec: bool,
    pub packet_loss_perc: u8,
}

impl OpusConfig {
    /// System audio is mostly music and effects, so use the full-band mode
    pub fn for_stream(config: &StreamConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            channels: config.channels,
            frame_size: config.frame_samples,
            bitrate: config.bitrate,
            application: OpusApplication::Audio,
            vbr: true,
            cvbr: true,
            fec: config.fec,
            packet_loss_perc: config.expected_loss_percent,
        }
    }

    /// Get frame duration in milliseconds
    pub fn frame_duration_ms(&self) -> f32 {
        self.frame_size as f32 * 1000.0 / self.sample_rate as f32
    }
}

/// Control API settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub bind_address: String,
    pub http_port: u16,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            http_port: DEFAULT_HTTP_PORT,
        }
    }
}

/// Everything persisted between runs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub stream: StreamConfig,
    pub ui: UiConfig,
}

impl AppConfig {
    /// Platform config file location, e.g. `~/.config/lan-audio-link/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "lan-audio-link").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from `path`, falling back to defaults when the file does not exist
    pub fn load(path: &Path) -> Result<Self, Error> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let text = fs::read_to_string(path)?;
        toml::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load from the platform location, or defaults
    pub fn load_default() -> Self {
        match Self::default_path() {
            Some(path) => Self::load(&path).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable config: {}", e);
                Self::default()
            }),
            None => Self::default(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), Error> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        fs::write(path, text)?;
        Ok(())
    }
}
