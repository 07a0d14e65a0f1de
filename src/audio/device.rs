//! Audio device enumeration and management
//!
//! Device ids carry their direction as a prefix: `input:<name>`,
//! `output:<name>` and `loopback:<name>`. A loopback device is an output
//! device opened for capture, which is how system audio is recorded under
//! WASAPI.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{SampleFormat, SupportedStreamConfigRange};

use crate::audio::capture::{Capturer, CpalCapturer};
use crate::audio::playback::{CpalPlayback, Playback};
use crate::clock::FrameClock;
use crate::error::AudioError;
use crate::protocol::AudioDeviceInfo;

/// Source of capture and playback devices
pub trait AudioBackend: Send + Sync {
    fn list_capture_devices(&self) -> Result<Vec<AudioDeviceInfo>, AudioError>;

    fn list_playback_devices(&self) -> Result<Vec<AudioDeviceInfo>, AudioError>;

    /// Open a capture device (`None` = platform default) at the clock's geometry
    fn open_capture(&self, id: Option<&str>, clock: &FrameClock) -> Result<Box<dyn Capturer>, AudioError>;

    /// Open a playback device (`None` = platform default) at the clock's geometry
    fn open_playback(&self, id: Option<&str>, clock: &FrameClock) -> Result<Box<dyn Playback>, AudioError>;
}

/// Which way a device is used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Input,
    Output,
    /// Output device captured as an input
    Loopback,
}

impl DeviceKind {
    fn prefix(self) -> &'static str {
        match self {
            DeviceKind::Input => "input",
            DeviceKind::Output => "output",
            DeviceKind::Loopback => "loopback",
        }
    }
}

/// Split a device id into its kind and cpal device name
pub fn parse_device_id(id: &str) -> (DeviceKind, &str) {
    if let Some(name) = id.strip_prefix("input:") {
        (DeviceKind::Input, name)
    } else if let Some(name) = id.strip_prefix("output:") {
        (DeviceKind::Output, name)
    } else if let Some(name) = id.strip_prefix("loopback:") {
        (DeviceKind::Loopback, name)
    } else {
        // Bare names are capture devices
        (DeviceKind::Input, id)
    }
}

pub fn device_id(kind: DeviceKind, name: &str) -> String {
    format!("{}:{}", kind.prefix(), name)
}

/// Loopback capture of output devices needs the WASAPI host
pub fn loopback_supported() -> bool {
    cfg!(target_os = "windows")
}

/// Devices of the platform's default cpal host
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }

    fn find_device(&self, kind: DeviceKind, name: &str) -> Result<cpal::Device, AudioError> {
        let host = cpal::default_host();
        let devices = match kind {
            DeviceKind::Input => host.input_devices()?,
            DeviceKind::Output | DeviceKind::Loopback => host.output_devices()?,
        };

        for device in devices {
            if device.name().map(|n| n == name).unwrap_or(false) {
                return Ok(device);
            }
        }

        Err(AudioError::DeviceNotFound(device_id(kind, name)))
    }

    fn default_device(&self, kind: DeviceKind) -> Result<cpal::Device, AudioError> {
        let host = cpal::default_host();
        let device = match kind {
            DeviceKind::Input => host.default_input_device(),
            DeviceKind::Output | DeviceKind::Loopback => host.default_output_device(),
        };
        device.ok_or_else(|| AudioError::DeviceNotFound(format!("No default {} device", kind.prefix())))
    }

    fn list(&self, kind: DeviceKind) -> Result<Vec<AudioDeviceInfo>, AudioError> {
        let host = cpal::default_host();
        let (devices, default_name) = match kind {
            DeviceKind::Input => (
                host.input_devices()?.collect::<Vec<_>>(),
                host.default_input_device().and_then(|d| d.name().ok()),
            ),
            DeviceKind::Output | DeviceKind::Loopback => (
                host.output_devices()?.collect::<Vec<_>>(),
                host.default_output_device().and_then(|d| d.name().ok()),
            ),
        };

        let mut infos = Vec::new();
        for device in devices {
            let Ok(name) = device.name() else {
                continue;
            };
            let (sample_rates, channels) = get_device_capabilities(&device, kind);
            infos.push(AudioDeviceInfo {
                id: device_id(kind, &name),
                is_default: default_name.as_ref() == Some(&name),
                name,
                is_input: kind != DeviceKind::Output,
                is_output: kind == DeviceKind::Output,
                is_loopback: kind == DeviceKind::Loopback,
                sample_rates,
                channels,
            });
        }

        Ok(infos)
    }
}

impl AudioBackend for CpalBackend {
    fn list_capture_devices(&self) -> Result<Vec<AudioDeviceInfo>, AudioError> {
        let mut devices = Vec::new();
        if loopback_supported() {
            devices.extend(self.list(DeviceKind::Loopback)?);
        }
        devices.extend(self.list(DeviceKind::Input)?);
        Ok(devices)
    }

    fn list_playback_devices(&self) -> Result<Vec<AudioDeviceInfo>, AudioError> {
        self.list(DeviceKind::Output)
    }

    fn open_capture(&self, id: Option<&str>, clock: &FrameClock) -> Result<Box<dyn Capturer>, AudioError> {
        let (kind, device) = match id {
            Some(id) => {
                let (kind, name) = parse_device_id(id);
                match kind {
                    DeviceKind::Output => {
                        return Err(AudioError::DeviceNotFound(format!(
                            "{} is a playback device; capture it as loopback:{}",
                            id, name
                        )))
                    }
                    DeviceKind::Loopback if !loopback_supported() => {
                        return Err(AudioError::DeviceNotFound(format!(
                            "{}: loopback capture is not available on this host",
                            id
                        )))
                    }
                    _ => (kind, self.find_device(kind, name)?),
                }
            }
            // System audio where the host can capture it, microphone otherwise
            None if loopback_supported() => (DeviceKind::Loopback, self.default_device(DeviceKind::Loopback)?),
            None => (DeviceKind::Input, self.default_device(DeviceKind::Input)?),
        };

        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let (config, format) = negotiate_format(&device, kind, &name, clock)?;
        tracing::info!(
            "Capture device: {} ({} Hz, {} ch, {:?})",
            device_id(kind, &name),
            config.sample_rate.0,
            config.channels,
            format
        );

        Ok(Box::new(CpalCapturer::new(device, device_id(kind, &name), config, format, *clock)))
    }

    fn open_playback(&self, id: Option<&str>, clock: &FrameClock) -> Result<Box<dyn Playback>, AudioError> {
        let device = match id {
            Some(id) => {
                let name = id.strip_prefix("output:").unwrap_or(id);
                self.find_device(DeviceKind::Output, name)?
            }
            None => self.default_device(DeviceKind::Output)?,
        };

        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let (config, format) = negotiate_format(&device, DeviceKind::Output, &name, clock)?;
        tracing::info!(
            "Playback device: {} ({} Hz, {} ch, {:?})",
            device_id(DeviceKind::Output, &name),
            config.sample_rate.0,
            config.channels,
            format
        );

        Ok(Box::new(CpalPlayback::new(
            device,
            device_id(DeviceKind::Output, &name),
            config,
            format,
            *clock,
        )))
    }
}

fn supported_ranges(device: &cpal::Device, kind: DeviceKind) -> Vec<SupportedStreamConfigRange> {
    let ranges: Result<Vec<_>, _> = match kind {
        DeviceKind::Input => device.supported_input_configs().map(|c| c.collect()),
        DeviceKind::Output | DeviceKind::Loopback => device.supported_output_configs().map(|c| c.collect()),
    };
    ranges.unwrap_or_default()
}

/// Pick a stream config that matches the clock exactly. Nothing is resampled
/// or remixed, so a device that cannot run the session geometry is refused.
fn negotiate_format(
    device: &cpal::Device,
    kind: DeviceKind,
    name: &str,
    clock: &FrameClock,
) -> Result<(cpal::StreamConfig, SampleFormat), AudioError> {
    let ranges = supported_ranges(device, kind);
    let rate = cpal::SampleRate(clock.sample_rate);

    for wanted in [SampleFormat::F32, SampleFormat::I16] {
        let found = ranges.iter().any(|r| {
            r.channels() == clock.channels
                && r.sample_format() == wanted
                && r.min_sample_rate() <= rate
                && rate <= r.max_sample_rate()
        });
        if found {
            let config = cpal::StreamConfig {
                channels: clock.channels,
                sample_rate: rate,
                buffer_size: cpal::BufferSize::Default,
            };
            return Ok((config, wanted));
        }
    }

    let found = ranges
        .iter()
        .map(|r| {
            format!(
                "{} ch {}-{} Hz {:?}",
                r.channels(),
                r.min_sample_rate().0,
                r.max_sample_rate().0,
                r.sample_format()
            )
        })
        .collect::<Vec<_>>()
        .join(", ");

    Err(AudioError::DeviceFormat {
        device: device_id(kind, name),
        expected: format!("{} Hz, {} ch, f32 or i16", clock.sample_rate, clock.channels),
        found: if found.is_empty() { "nothing".to_string() } else { found },
    })
}

/// Get device capabilities
fn get_device_capabilities(device: &cpal::Device, kind: DeviceKind) -> (Vec<u32>, Vec<u16>) {
    let mut sample_rates = Vec::new();
    let mut channels = Vec::new();

    for config in supported_ranges(device, kind) {
        for rate_val in [8000u32, 16000, 24000, 44100, 48000, 96000] {
            let rate = cpal::SampleRate(rate_val);
            if rate >= config.min_sample_rate() && rate <= config.max_sample_rate() && !sample_rates.contains(&rate_val) {
                sample_rates.push(rate_val);
            }
        }

        let ch = config.channels();
        if !channels.contains(&ch) {
            channels.push(ch);
        }
    }

    sample_rates.sort_unstable();
    channels.sort_unstable();

    (sample_rates, channels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_id() {
        assert_eq!(parse_device_id("input:Mic"), (DeviceKind::Input, "Mic"));
        assert_eq!(parse_device_id("output:Speakers"), (DeviceKind::Output, "Speakers"));
        assert_eq!(parse_device_id("loopback:Speakers"), (DeviceKind::Loopback, "Speakers"));
        assert_eq!(parse_device_id("Line In"), (DeviceKind::Input, "Line In"));
        // Only the first prefix counts
        assert_eq!(parse_device_id("input:output:x"), (DeviceKind::Input, "output:x"));
    }

    #[test]
    fn test_device_id_roundtrip() {
        let id = device_id(DeviceKind::Loopback, "Speakers (Realtek)");
        assert_eq!(id, "loopback:Speakers (Realtek)");
        assert_eq!(parse_device_id(&id), (DeviceKind::Loopback, "Speakers (Realtek)"));
    }

    #[test]
    fn test_listing_does_not_panic() {
        // Machines without audio hardware just report nothing
        let backend = CpalBackend::new();
        if let Ok(devices) = backend.list_capture_devices() {
            assert!(devices.iter().all(|d| d.is_input));
        }
        if let Ok(devices) = backend.list_playback_devices() {
            assert!(devices.iter().all(|d| d.is_output && d.id.starts_with("output:")));
        }
    }

    #[test]
    fn test_output_id_cannot_be_captured() {
        let backend = CpalBackend::new();
        let result = backend.open_capture(Some("output:Speakers"), &FrameClock::default());
        assert!(matches!(result, Err(AudioError::DeviceNotFound(_))));
    }
}
