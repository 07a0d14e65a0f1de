//! LAN Audio Link
//!
//! Streams this host's audio to the peer and plays the peer's audio back.
//!
//! ```text
//! streamer [PEER_IP] [--config PATH] [--synthetic] [--no-api]
//! ```

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_audio_link::{
    audio::{device::AudioBackend, CpalBackend, SyntheticBackend},
    config::AppConfig,
    ui::{AppState, WebServer},
};

/// How often running counters are logged
const STATS_INTERVAL: Duration = Duration::from_secs(5);

struct Args {
    peer: Option<String>,
    config_path: Option<PathBuf>,
    synthetic: bool,
    api: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        peer: None,
        config_path: None,
        synthetic: false,
        api: true,
    };

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--synthetic" => args.synthetic = true,
            "--no-api" => args.api = false,
            "--config" => {
                let path = iter.next().context("--config needs a path")?;
                args.config_path = Some(PathBuf::from(path));
            }
            flag if flag.starts_with("--") => anyhow::bail!("Unknown option {}", flag),
            peer => args.peer = Some(peer.to_string()),
        }
    }

    Ok(args)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = parse_args()?;
    tracing::info!("Starting LAN Audio Link");

    let config_path = args.config_path.clone().or_else(AppConfig::default_path);
    let mut config = match &config_path {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    if let Some(peer) = args.peer {
        config.stream.peer_address = peer;
    }

    let backend: Arc<dyn AudioBackend> = if args.synthetic {
        tracing::info!("Using synthetic audio devices");
        Arc::new(SyntheticBackend::new())
    } else {
        Arc::new(CpalBackend::new())
    };

    let ui = config.ui.clone();
    let state = Arc::new(AppState::new(config, config_path, backend));

    if args.api {
        let _web_handle = WebServer::new(state.clone()).start_background();
        tracing::info!("Control API available at http://{}:{}", ui.bind_address, ui.http_port);
    }

    // Devices can take a moment to open
    let starter = state.clone();
    tokio::task::spawn_blocking(move || {
        let stream = starter.config.read().stream.clone();
        match lan_audio_link::start_session(stream, starter.backend.as_ref()) {
            Ok(session) => *starter.session.lock() = Some(session),
            Err(e) => tracing::error!("Could not start streaming: {}", e),
        }
    })
    .await?;

    if state.session.lock().is_none() && !args.api {
        anyhow::bail!("Nothing to run");
    }

    tracing::info!("Running - press Ctrl+C to stop");

    let mut ticker = tokio::time::interval(STATS_INTERVAL);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                if let Some(session) = state.session.lock().as_ref() {
                    let stats = session.stats();
                    tracing::info!(
                        "Stats: sent {} ({:.1} KB), received {}, lost {:.1}%, concealed {}, jitter {:.1} ms, depth {}",
                        stats.packets_sent,
                        stats.bytes_sent as f64 / 1024.0,
                        stats.packets_received,
                        stats.loss_rate() * 100.0,
                        stats.frames_concealed,
                        stats.jitter_ms,
                        stats.jitter_depth
                    );
                    if !session.is_running() {
                        tracing::warn!("Both directions have stopped");
                    }
                }
            }
        }
    }

    tracing::info!("Shutting down");
    let stopper = state.clone();
    tokio::task::spawn_blocking(move || {
        if let Some(mut session) = stopper.session.lock().take() {
            session.stop();
        }
    })
    .await?;

    Ok(())
}
