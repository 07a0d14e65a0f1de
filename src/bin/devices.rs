//! Lists the audio devices a session can use
//!
//! ```text
//! devices [--json]
//! ```

use anyhow::Result;
use serde::Serialize;

use lan_audio_link::{
    audio::{device::AudioBackend, CpalBackend},
    protocol::AudioDeviceInfo,
};

#[derive(Serialize)]
struct Devices {
    capture: Vec<AudioDeviceInfo>,
    playback: Vec<AudioDeviceInfo>,
}

fn print_devices(title: &str, devices: &[AudioDeviceInfo]) {
    println!("\n=== {} ===", title);
    if devices.is_empty() {
        println!("  (none)");
    }
    for device in devices {
        let device_type = match (device.is_loopback, device.is_input, device.is_output) {
            (true, _, _) => "Loopback",
            (false, true, true) => "Input/Output",
            (false, true, false) => "Input",
            (false, false, true) => "Output",
            _ => "Unknown",
        };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {} ({}){}:", device.name, device_type, default_marker);
        println!("    ID: {}", device.id);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
}

fn main() -> Result<()> {
    let json = std::env::args().skip(1).any(|arg| arg == "--json");

    let backend = CpalBackend::new();
    let devices = Devices {
        capture: backend.list_capture_devices()?,
        playback: backend.list_playback_devices()?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    print_devices("Capture Devices", &devices.capture);
    print_devices("Playback Devices", &devices.playback);
    println!();
    Ok(())
}
