//! `LookoutServer`: Axum HTTP + WebSocket server.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use lookout_core::{CloseReason, SessionId};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::metrics;
use crate::shutdown::ShutdownCoordinator;
use crate::signaling::{PeerRole, SignalingHub};
use crate::websocket::session::{reject, run_ws_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Signaling engine.
    pub hub: Arc<SignalingHub>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
}

/// Query parameters on the `/ws` upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    /// `broadcaster` or `viewer`.
    pub role: Option<String>,
    /// Viewer bearer token.
    pub token: Option<String>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// GET /ws
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> Response {
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, params, state))
}

async fn handle_socket(socket: WebSocket, params: ConnectParams, state: AppState) {
    if state.shutdown.is_shutting_down() {
        reject(socket, CloseReason::Shutdown).await;
        return;
    }
    let admitted = state
        .hub
        .admit(params.role.as_deref(), params.token.as_deref())
        .await;
    match admitted {
        Ok((role, viewer)) => {
            run_ws_session(
                socket,
                state.hub.clone(),
                SessionId::new(),
                role,
                viewer,
                state.shutdown.token(),
                state.config.send_queue_capacity,
            )
            .await;
        }
        Err(reason) => {
            debug!(code = reason.code(), "connection refused at admission");
            reject(socket, reason).await;
        }
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = state.hub.registry();
    Json(health::health_check(
        state.start_time,
        registry.len(),
        state.hub.directory().len(),
        registry.count_role(PeerRole::Viewer),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => metrics::render(handle).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}

/// The Lookout signaling server.
pub struct LookoutServer {
    config: Arc<ServerConfig>,
    hub: Arc<SignalingHub>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl LookoutServer {
    /// Create a server around an existing hub.
    pub fn new(config: ServerConfig, hub: Arc<SignalingHub>, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            config: Arc::new(config),
            hub,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            metrics,
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        build_router(AppState {
            hub: self.hub.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
            config: self.config.clone(),
        })
    }

    /// Get the signaling hub.
    pub fn hub(&self) -> &Arc<SignalingHub> {
        &self.hub
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the listener and start serving. Also starts the liveness
    /// monitor.
    pub async fn listen(self) -> io::Result<ServerHandle> {
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();

        let token = self.shutdown.token();
        let server = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "server exited with error");
            }
        });
        let liveness = tokio::spawn(self.hub.clone().run_liveness(self.shutdown.token()));

        info!(%addr, "lookout server listening");
        Ok(ServerHandle {
            addr,
            hub: self.hub,
            shutdown: self.shutdown,
            server,
            liveness,
            tasks: Vec::new(),
            timeout: self.config.shutdown_timeout(),
        })
    }
}

/// Handle to a running server.
pub struct ServerHandle {
    addr: SocketAddr,
    hub: Arc<SignalingHub>,
    shutdown: Arc<ShutdownCoordinator>,
    server: JoinHandle<()>,
    liveness: JoinHandle<()>,
    tasks: Vec<JoinHandle<()>>,
    timeout: std::time::Duration,
}

impl ServerHandle {
    /// Bound address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Bound port.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Token cancelled when shutdown begins.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.token()
    }

    /// Drain `handle` during shutdown.
    pub fn track(&mut self, handle: JoinHandle<()>) {
        self.tasks.push(handle);
    }

    /// Close every connection with 1001, stop accepting, and wait for
    /// background tasks, aborting any still running at the timeout.
    pub async fn shutdown(self) {
        info!(connections = self.hub.registry().len(), "shutting down");
        self.hub.close_all(CloseReason::Shutdown);
        let mut handles = vec![self.server, self.liveness];
        handles.extend(self.tasks);
        self.shutdown
            .graceful_shutdown(handles, Some(self.timeout))
            .await;
    }
}
