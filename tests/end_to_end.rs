//! Whole-session tests over loopback UDP

mod common;

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use common::{free_port, wait_for, LossyRelay, ManualBackend};
use lan_audio_link::audio::synthetic::{render_tone, SyntheticBackend};
use lan_audio_link::audio::AudioFrame;
use lan_audio_link::codec::{AudioDecoder, AudioEncoder, ConcealmentPolicy, OpusDecoder, OpusEncoder};
use lan_audio_link::config::{JitterConfig, OpusConfig, StreamConfig};
use lan_audio_link::{get_stats, start_session, stop_session};

const TIMEOUT: Duration = Duration::from_secs(3);

fn config_via(relay_port: u16) -> StreamConfig {
    StreamConfig {
        peer_address: "127.0.0.1".into(),
        send_port: relay_port,
        receive_port: 0,
        jitter: JitterConfig {
            target_depth: 1,
            ..JitterConfig::default()
        },
        ..StreamConfig::default()
    }
}

#[test]
fn test_lossy_link_conceals_exactly_the_lost_frames() {
    const FRAMES: u32 = 100;

    let mut rng = StdRng::seed_from_u64(7);
    let lost: HashSet<u32> = rand::seq::index::sample(&mut rng, FRAMES as usize - 1, 5)
        .into_iter()
        .map(|i| i as u32 + 1)
        .collect();

    let receive_port = free_port();
    let target: SocketAddr = format!("127.0.0.1:{}", receive_port).parse().unwrap();
    let relay = LossyRelay::start(target, lost.clone());

    let backend = ManualBackend::new();
    let mut config = config_via(relay.addr().port());
    config.receive_port = receive_port;
    let mut session = start_session(config.clone(), &backend).unwrap();

    let clock = config.clock();
    let mut frame = AudioFrame::silence(&clock);
    let mut out = AudioFrame::silence(&clock);
    let mut kinds = Vec::new();

    for i in 0..FRAMES {
        frame.index = i as u64;
        render_tone(&mut frame, &clock);
        assert!(backend.capture(&frame));

        assert!(wait_for(TIMEOUT, || relay.handled() == i as u64 + 1), "frame {} never sent", i);
        let forwarded = relay.forwarded();
        assert!(wait_for(TIMEOUT, || get_stats(&session).packets_received == forwarded));

        let before = get_stats(&session);
        backend.pull(&mut out).unwrap();
        let after = get_stats(&session);
        kinds.push(after.frames_concealed > before.frames_concealed);
    }

    let stats = get_stats(&session);
    assert_eq!(stats.packets_sent, FRAMES as u64);
    assert_eq!(stats.packets_received, (FRAMES - 5) as u64);
    assert_eq!(stats.frames_decoded + stats.frames_concealed, FRAMES as u64);
    assert_eq!(stats.frames_concealed, 5);
    assert_eq!(stats.packets_lost, 5);
    assert_eq!(stats.frames_silent, 0);

    let concealed_at: HashSet<u32> = kinds
        .iter()
        .enumerate()
        .filter(|(_, &concealed)| concealed)
        .map(|(i, _)| i as u32)
        .collect();
    assert_eq!(concealed_at, lost);

    // Every frame played has the stream's geometry and a running index
    assert_eq!(out.samples.len(), clock.samples_per_frame());
    assert_eq!(out.index, FRAMES as u64 - 1);

    stop_session(&mut session);
    assert!(!session.is_running());
}

#[test]
fn test_capture_failure_leaves_inbound_running() {
    let backend = ManualBackend::new();
    let mut session = start_session(config_via(9), &backend).unwrap();
    assert!(session.is_outbound_active());
    assert!(session.is_inbound_active());

    backend.unplug_capture();
    assert!(wait_for(TIMEOUT, || !session.is_outbound_active()));
    assert!(session.is_inbound_active());
    assert!(session.is_running());

    // Playback still gets frames (silence, nothing has arrived)
    let clock = session.config().clock();
    let mut out = AudioFrame::new(vec![1.0; clock.samples_per_frame()], clock.channels, 0);
    backend.pull(&mut out).unwrap();
    assert_eq!(out.peak(), 0.0);

    stop_session(&mut session);
    assert!(backend.pull(&mut out).is_none());
}

#[test]
fn test_two_hosts_stream_both_ways() {
    let port_a = free_port();
    let port_b = free_port();

    let host = |receive_port: u16, send_port: u16| StreamConfig {
        peer_address: "127.0.0.1".into(),
        send_port,
        receive_port,
        ..StreamConfig::default()
    };

    let backend = SyntheticBackend::new();
    let mut a = start_session(host(port_a, port_b), &backend).unwrap();
    let mut b = start_session(host(port_b, port_a), &backend).unwrap();

    assert!(wait_for(TIMEOUT, || {
        get_stats(&a).frames_decoded >= 10 && get_stats(&b).frames_decoded >= 10
    }));

    for session in [&a, &b] {
        let stats = get_stats(session);
        assert!(stats.packets_sent > 0);
        assert_eq!(stats.packets_malformed, 0);
        assert_eq!(stats.decode_errors, 0);
    }

    stop_session(&mut a);
    stop_session(&mut b);
}

#[test]
fn test_codec_chain_is_lossless_in_count() {
    let config = StreamConfig::default();
    let clock = config.clock();
    let mut encoder = OpusEncoder::new(OpusConfig::for_stream(&config)).unwrap();
    let mut decoder = OpusDecoder::new(clock, ConcealmentPolicy::Native, false).unwrap();

    let mut frame = AudioFrame::silence(&clock);
    let mut out = AudioFrame::silence(&clock);
    let mut decoded = 0;

    for i in 0..50 {
        frame.index = i;
        render_tone(&mut frame, &clock);
        let payload = encoder.encode(&frame).unwrap();
        assert!(!payload.is_empty());
        decoder.decode(&payload, &mut out).unwrap();
        assert_eq!(out.samples.len(), clock.samples_per_frame());
        decoded += 1;
    }

    assert_eq!(decoded, 50);
    assert_eq!(encoder.stats().frames_encoded, 50);
    assert_eq!(decoder.stats().frames_decoded, 50);
    // The tone survives the round trip
    assert!(out.peak() > 0.1);
}
