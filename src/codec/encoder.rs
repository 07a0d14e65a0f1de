//! Opus encoder wrapper
//!
//! One PCM frame in, one compressed payload out. Output is capped at the
//! largest payload that still fits a single datagram.

use bytes::Bytes;
use opus::{Application, Channels, Encoder};

use crate::audio::buffer::AudioFrame;
use crate::config::{OpusApplication, OpusConfig};
use crate::error::CodecError;
use crate::protocol::MAX_PAYLOAD_SIZE;

/// Compresses one frame at a time
pub trait AudioEncoder: Send {
    /// Encode exactly one frame. A wrong-sized frame is an error, and the
    /// caller drops that frame.
    fn encode(&mut self, frame: &AudioFrame) -> Result<Bytes, CodecError>;
}

/// Opus implementation of [`AudioEncoder`]
pub struct OpusEncoder {
    encoder: Encoder,
    config: OpusConfig,
    /// Scratch output, sized to the largest payload a datagram can carry
    scratch: Vec<u8>,
    frames_encoded: u64,
    payload_bytes: u64,
}

fn init_error(setting: &str) -> impl FnOnce(opus::Error) -> CodecError + '_ {
    move |e| CodecError::EncoderInit(format!("{}: {}", setting, e))
}

impl OpusEncoder {
    pub fn new(config: OpusConfig) -> Result<Self, CodecError> {
        let channels = match config.channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            n => return Err(CodecError::EncoderInit(format!("{} channels not supported", n))),
        };

        let application = match config.application {
            OpusApplication::Voip => Application::Voip,
            OpusApplication::Audio => Application::Audio,
            OpusApplication::LowDelay => Application::LowDelay,
        };

        let mut encoder =
            Encoder::new(config.sample_rate, channels, application).map_err(init_error("create"))?;
        apply_settings(&mut encoder, &config)?;

        tracing::debug!(
            "Opus encoder: {} Hz, {} ch, {} bps, {:.1} ms frames, fec={}",
            config.sample_rate,
            config.channels,
            config.bitrate,
            config.frame_duration_ms(),
            config.fec
        );

        Ok(Self {
            encoder,
            config,
            scratch: vec![0u8; MAX_PAYLOAD_SIZE],
            frames_encoded: 0,
            payload_bytes: 0,
        })
    }

    pub fn config(&self) -> &OpusConfig {
        &self.config
    }

    /// Interleaved samples one input frame must hold
    pub fn samples_per_frame(&self) -> usize {
        self.config.frame_size * self.config.channels as usize
    }

    pub fn stats(&self) -> EncoderStats {
        let average_payload_size = match self.frames_encoded {
            0 => 0.0,
            n => self.payload_bytes as f32 / n as f32,
        };
        EncoderStats {
            frames_encoded: self.frames_encoded,
            payload_bytes: self.payload_bytes,
            average_payload_size,
        }
    }
}

fn apply_settings(encoder: &mut Encoder, config: &OpusConfig) -> Result<(), CodecError> {
    encoder
        .set_bitrate(opus::Bitrate::Bits(config.bitrate as i32))
        .map_err(init_error("bitrate"))?;
    encoder.set_vbr(config.vbr).map_err(init_error("vbr"))?;
    // Constraint only applies in VBR mode
    if config.vbr {
        encoder
            .set_vbr_constraint(config.cvbr)
            .map_err(init_error("vbr constraint"))?;
    }

    encoder.set_inband_fec(config.fec).map_err(init_error("inband fec"))?;
    if config.fec {
        encoder
            .set_packet_loss_perc(config.packet_loss_perc as i32)
            .map_err(init_error("expected loss"))?;
    }

    Ok(())
}

impl AudioEncoder for OpusEncoder {
    fn encode(&mut self, frame: &AudioFrame) -> Result<Bytes, CodecError> {
        if frame.samples.len() != self.samples_per_frame() {
            return Err(CodecError::InvalidFrameSize(frame.samples.len()));
        }

        let len = self
            .encoder
            .encode_float(&frame.samples, &mut self.scratch)
            .map_err(|e| CodecError::EncodingFailed(e.to_string()))?;

        self.frames_encoded += 1;
        self.payload_bytes += len as u64;
        Ok(Bytes::copy_from_slice(&self.scratch[..len]))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub payload_bytes: u64,
    pub average_payload_size: f32,
}
