//! HTTP API handlers

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

use crate::codec::Transcoder;
use crate::network::ReceiverStatsSnapshot;
use crate::protocol::{SessionId, SessionInfo, SessionSummary};
use crate::ui::server::AppState;

/// API response wrapper
#[derive(serde::Serialize)]
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

/// System status
#[derive(serde::Serialize)]
pub struct SystemStatus {
    pub session_count: usize,
    pub uptime_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingress: Option<ReceiverStatsSnapshot>,
}

fn parse_id(raw: &str) -> Result<SessionId, String> {
    raw.trim()
        .parse()
        .map_err(|_| format!("Invalid session id: {}", raw))
}

/// Allocate a session and tell the producer where to send packets
pub async fn connect(State(state): State<Arc<AppState>>) -> Response {
    match state.registry.create_default_session() {
        Ok(session) => {
            let info = SessionInfo {
                ip: state.config.network.advertised_host.clone(),
                port: state.data_port,
                session_id: session.id(),
                audio_info: session.audio_info(),
            };
            Json(info).into_response()
        }
        Err(e) => {
            tracing::error!("Failed to create session: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// List session ids
pub async fn list_session_ids(State(state): State<Arc<AppState>>) -> Json<Vec<SessionId>> {
    Json(state.registry.ids())
}

/// Get system status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse<SystemStatus>> {
    let status = SystemStatus {
        session_count: state.registry.len(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        ingress: state.ingress.as_ref().map(|stats| stats.snapshot()),
    };

    Json(ApiResponse::ok(status))
}

/// Get all sessions with their details
pub async fn get_sessions(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<Vec<SessionSummary>>> {
    Json(ApiResponse::ok(state.registry.list_sessions()))
}

/// Get one session
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> (StatusCode, Json<ApiResponse<SessionSummary>>) {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(e) => return (StatusCode::BAD_REQUEST, Json(ApiResponse::error(e))),
    };
    match state.registry.lookup(id) {
        Some(session) => (StatusCode::OK, Json(ApiResponse::ok(session.summary()))),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("Session not found: {}", id))),
        ),
    }
}

/// Stop and remove a session
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> (StatusCode, Json<ApiResponse<()>>) {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(e) => return (StatusCode::BAD_REQUEST, Json(ApiResponse::error(e))),
    };
    match state.registry.remove_session(id) {
        Some(_) => (StatusCode::OK, Json(ApiResponse::ok(()))),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("Session not found: {}", id))),
        ),
    }
}

/// Stream a session's audio through the transcoder
pub async fn stream_audio(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(e) => return (StatusCode::BAD_REQUEST, e).into_response(),
    };
    let Some(session) = state.registry.lookup(id) else {
        tracing::warn!(session_id = id, "Audio requested for nonexistent session");
        return (
            StatusCode::NOT_FOUND,
            format!("That stream: {} does not exist", id),
        )
            .into_response();
    };

    let reader = session.subscribe(&state.config.reader);
    let transcoder = match Transcoder::spawn(reader, session.audio_info(), &state.config.transcoder) {
        Ok(transcoder) => transcoder,
        Err(e) => {
            tracing::error!(session_id = id, "Failed to start transcoder: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };

    (
        [(header::CONTENT_TYPE, state.config.transcoder.content_type.clone())],
        Body::from_stream(transcoder.into_stream()),
    )
        .into_response()
}
