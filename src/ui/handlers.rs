//! HTTP API handlers

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::StreamConfig;
use crate::protocol::AudioDeviceInfo;
use crate::session::start_session;
use crate::stats::StatsSnapshot;
use crate::ui::server::AppState;

/// API response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

type ApiResult<T> = (StatusCode, Json<ApiResponse<T>>);

fn ok<T>(data: T) -> ApiResult<T> {
    (StatusCode::OK, Json(ApiResponse::ok(data)))
}

fn fail<T>(status: StatusCode, msg: impl Into<String>) -> ApiResult<T> {
    (status, Json(ApiResponse::error(msg)))
}

/// System status
#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub streaming: bool,
    pub session_id: Option<Uuid>,
    pub session_started_at: Option<DateTime<Utc>>,
    pub outbound_active: bool,
    pub inbound_active: bool,
    pub peer_address: String,
    pub uptime_seconds: u64,
}

fn status_of(state: &AppState) -> SystemStatus {
    let session = state.session.lock();
    let config = state.config.read();
    SystemStatus {
        streaming: session.as_ref().is_some_and(|s| s.is_running()),
        session_id: session.as_ref().map(|s| s.id()),
        session_started_at: session.as_ref().map(|s| s.started_at()),
        outbound_active: session.as_ref().is_some_and(|s| s.is_outbound_active()),
        inbound_active: session.as_ref().is_some_and(|s| s.is_inbound_active()),
        peer_address: session
            .as_ref()
            .map(|s| s.config().peer_address.clone())
            .unwrap_or_else(|| config.stream.peer_address.clone()),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    }
}

/// Get system status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse<SystemStatus>> {
    Json(ApiResponse::ok(status_of(&state)))
}

/// Capture and playback devices
#[derive(Debug, Serialize)]
pub struct DeviceList {
    pub capture: Vec<AudioDeviceInfo>,
    pub playback: Vec<AudioDeviceInfo>,
}

/// Get available audio devices
pub async fn get_devices(State(state): State<Arc<AppState>>) -> ApiResult<DeviceList> {
    let backend = state.backend.clone();
    let listed = tokio::task::spawn_blocking(move || {
        Ok::<_, crate::error::AudioError>(DeviceList {
            capture: backend.list_capture_devices()?,
            playback: backend.list_playback_devices()?,
        })
    })
    .await;

    match listed {
        Ok(Ok(devices)) => ok(devices),
        Ok(Err(e)) => fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        Err(e) => fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Counters of the running (or last) session
pub async fn get_stats(State(state): State<Arc<AppState>>) -> ApiResult<StatsSnapshot> {
    match state.session.lock().as_ref() {
        Some(session) => ok(session.stats()),
        None => fail(StatusCode::NOT_FOUND, "No session"),
    }
}

/// Clears the in-progress start flag however the start ends
struct StartGuard<'a>(&'a AtomicBool);

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Open devices and sockets for a new session. The session lock is only
/// held to swap handles, so status and stats stay responsive meanwhile.
fn start_exclusive(state: &AppState) -> Result<(), (StatusCode, String)> {
    let previous = {
        let mut session = state.session.lock();
        if session.as_ref().is_some_and(|s| s.is_running()) {
            return Err((StatusCode::CONFLICT, "Already streaming".to_string()));
        }
        session.take()
    };
    // Release the previous session's ports before binding again
    if let Some(mut previous) = previous {
        previous.stop();
    }

    let config = state.config.read().stream.clone();
    let handle = start_session(config, state.backend.as_ref()).map_err(|e| {
        tracing::error!("Failed to start session: {}", e);
        (StatusCode::BAD_REQUEST, e.to_string())
    })?;

    *state.session.lock() = Some(handle);
    Ok(())
}

/// Start streaming with the current configuration
pub async fn start_streaming(State(state): State<Arc<AppState>>) -> ApiResult<SystemStatus> {
    if state.starting.swap(true, Ordering::SeqCst) {
        return fail(StatusCode::CONFLICT, "Session is already starting");
    }

    let worker = state.clone();
    // Opening devices blocks for up to a few seconds
    let started = tokio::task::spawn_blocking(move || {
        let _guard = StartGuard(&worker.starting);
        start_exclusive(&worker)
    })
    .await;

    match started {
        Ok(Ok(())) => ok(status_of(&state)),
        Ok(Err((status, msg))) => fail(status, msg),
        Err(e) => fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Stop streaming. Stopping when idle is not an error.
pub async fn stop_streaming(State(state): State<Arc<AppState>>) -> ApiResult<SystemStatus> {
    let worker = state.clone();
    let stopped = tokio::task::spawn_blocking(move || {
        if let Some(session) = worker.session.lock().as_mut() {
            session.stop();
        }
    })
    .await;

    match stopped {
        Ok(()) => ok(status_of(&state)),
        Err(e) => fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Current stream configuration
pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<ApiResponse<StreamConfig>> {
    Json(ApiResponse::ok(state.config.read().stream.clone()))
}

/// Replace the stream configuration. Applies to the next session.
pub async fn update_config(
    State(state): State<Arc<AppState>>,
    Json(stream): Json<StreamConfig>,
) -> ApiResult<StreamConfig> {
    if let Err(e) = stream.validate() {
        return fail(StatusCode::BAD_REQUEST, e.to_string());
    }

    let snapshot = {
        let mut config = state.config.write();
        config.stream = stream.clone();
        config.clone()
    };

    if let Some(path) = &state.config_path {
        if let Err(e) = snapshot.save(path) {
            tracing::warn!("Could not save config to {}: {}", path.display(), e);
        }
    }

    tracing::info!("Stream configuration updated (peer {})", stream.peer_address);
    ok(stream)
}
