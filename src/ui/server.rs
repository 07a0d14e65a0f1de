//! Control API server

use axum::{
    routing::{get, post},
    Router,
};
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;

use crate::audio::device::AudioBackend;
use crate::config::AppConfig;
use crate::session::SessionHandle;
use crate::ui::handlers;

/// Shared state behind every handler
pub struct AppState {
    pub config: RwLock<AppConfig>,
    /// Where `PUT /api/config` persists to (`None` = memory only)
    pub config_path: Option<PathBuf>,
    pub backend: Arc<dyn AudioBackend>,
    pub session: Mutex<Option<SessionHandle>>,
    /// A start request is opening devices
    pub starting: AtomicBool,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: AppConfig, config_path: Option<PathBuf>, backend: Arc<dyn AudioBackend>) -> Self {
        Self {
            config: RwLock::new(config),
            config_path,
            backend,
            session: Mutex::new(None),
            starting: AtomicBool::new(false),
            started_at: Instant::now(),
        }
    }
}

/// Build the API router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/status", get(handlers::get_status))
        .route("/api/devices", get(handlers::get_devices))
        .route("/api/stats", get(handlers::get_stats))
        .route("/api/session/start", post(handlers::start_streaming))
        .route("/api/session/stop", post(handlers::stop_streaming))
        .route("/api/config", get(handlers::get_config).put(handlers::update_config))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// HTTP server for the control API
pub struct WebServer {
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    /// Serve until the listener fails
    pub async fn run(self) -> anyhow::Result<()> {
        let ui = self.state.config.read().ui.clone();
        let addr = format!("{}:{}", ui.bind_address, ui.http_port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!("Control API listening on http://{}", addr);

        axum::serve(listener, router(self.state)).await?;
        Ok(())
    }

    /// Serve on a background task
    pub fn start_background(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run().await {
                tracing::error!("Control API stopped: {}", e);
            }
        })
    }
}
