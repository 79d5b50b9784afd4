//! HTTP server for signalling and audio egress

use axum::{routing::get, Router};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::network::ReceiverStats;
use crate::session::SessionRegistry;

/// Shared state for handlers
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub config: AppConfig,
    /// UDP port handed to producers; the bound port when it differs from the config
    pub data_port: u16,
    pub ingress: Option<Arc<ReceiverStats>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(registry: Arc<SessionRegistry>, config: AppConfig) -> Self {
        let data_port = config.network.udp_port;
        Self {
            registry,
            config,
            data_port,
            ingress: None,
            started_at: Instant::now(),
        }
    }

    pub fn with_data_port(mut self, port: u16) -> Self {
        self.data_port = port;
        self
    }

    pub fn with_ingress(mut self, stats: Arc<ReceiverStats>) -> Self {
        self.ingress = Some(stats);
        self
    }
}

/// Build the application router
pub fn router(state: Arc<AppState>) -> Router {
    let static_dir = state.config.ui.static_dir.clone();

    Router::new()
        .route("/connect", get(handlers::connect))
        .route("/sessions", get(handlers::list_session_ids))
        .route("/api/status", get(handlers::get_status))
        .route("/api/sessions", get(handlers::get_sessions))
        .route(
            "/api/sessions/:id",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route("/audio/:id", get(handlers::stream_audio))
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Web server
pub struct WebServer {
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(state: AppState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    /// Address from the UI config
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let ui = &self.state.config.ui;
        format!("{}:{}", ui.bind_address, ui.http_port)
            .parse()
            .map_err(|e| Error::Config(format!("invalid HTTP bind address: {}", e)))
    }

    /// Serve until `shutdown` resolves
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.bind_addr()?;
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("HTTP server listening on {}", listener.local_addr()?);

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Start the server on a background task
    pub fn start_background<F>(self, shutdown: F) -> JoinHandle<Result<()>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(self.serve(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Packet, SessionInfo};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_state() -> Arc<AppState> {
        let config = AppConfig::default();
        let registry = Arc::new(SessionRegistry::new(config.session.clone()));
        Arc::new(AppState::new(registry, config).with_data_port(40000))
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_connect_creates_session() {
        let state = test_state();
        let (status, body) = get(router(state.clone()), "/connect").await;
        assert_eq!(status, StatusCode::OK);

        let info: SessionInfo = serde_json::from_slice(&body).unwrap();
        assert_eq!(info.port, 40000);
        assert_eq!(info.ip, "127.0.0.1");
        assert_eq!(info.audio_info, state.config.session.audio_info);
        assert!(state.registry.lookup(info.session_id).is_some());

        state.registry.shutdown();
    }

    #[tokio::test]
    async fn test_list_session_ids() {
        let state = test_state();
        let a = state.registry.create_default_session().unwrap().id();
        let b = state.registry.create_default_session().unwrap().id();

        let (status, body) = get(router(state.clone()), "/sessions").await;
        assert_eq!(status, StatusCode::OK);
        let mut ids: Vec<u64> = serde_json::from_slice(&body).unwrap();
        ids.sort_unstable();
        let mut expected = vec![a, b];
        expected.sort_unstable();
        assert_eq!(ids, expected);

        state.registry.shutdown();
    }

    #[tokio::test]
    async fn test_audio_unknown_session() {
        let (status, body) = get(router(test_state()), "/audio/12345").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, b"That stream: 12345 does not exist");
    }

    #[tokio::test]
    async fn test_audio_invalid_id() {
        let (status, _) = get(router(test_state()), "/audio/not-a-number").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_session_detail_and_delete() {
        let state = test_state();
        let session = state.registry.create_default_session().unwrap();
        session.push(Packet::new(session.id(), 0, 0, vec![0u8; 8])).unwrap();

        let uri = format!("/api/sessions/{}", session.id());
        let (status, body) = get(router(state.clone()), &uri).await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["id"], session.id());

        let response = router(state.clone())
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(&uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(state.registry.lookup(session.id()).is_none());
        assert!(!session.is_running());

        let (status, _) = get(router(state), &uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_status() {
        let state = test_state();
        state.registry.create_default_session().unwrap();

        let (status, body) = get(router(state.clone()), "/api/status").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["data"]["session_count"], 1);
        assert!(json["data"].get("ingress").is_none());

        state.registry.shutdown();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_audio_stream_passthrough() {
        let mut config = AppConfig::default();
        config.transcoder.program = "sh".into();
        config.transcoder.args = vec!["-c".into(), "exec cat".into()];
        config.transcoder.content_type = "audio/L16".into();
        let registry = Arc::new(SessionRegistry::new(config.session.clone()));
        let state = Arc::new(AppState::new(registry, config));
        let session = state.registry.create_default_session().unwrap();

        let uri = format!("/audio/{}", session.id());
        let response = router(state.clone())
            .oneshot(Request::builder().uri(&uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "audio/L16");

        // Give the reader time to register before producing
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(session.listener_count(), 1);
        session.push(Packet::new(session.id(), 0, 0, vec![7u8; 4])).unwrap();
        session.push(Packet::new(session.id(), 0, 4, vec![9u8; 4])).unwrap();

        // End the session so the body terminates
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        state.registry.remove_session(session.id());

        let body = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            to_bytes(response.into_body(), usize::MAX),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(body.as_ref(), &[7, 7, 7, 7, 9, 9, 9, 9]);
    }
}
