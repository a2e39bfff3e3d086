//! HTTP and WebSocket handlers for the Vigil server.
//!
//! This module wires the axum routes to the connection manager and owns the
//! server's shutdown sequence.

use crate::config::Config;
use anyhow::{Context, Result};
use axum::{
    extract::{ws::WebSocket, ConnectInfo, Path, Query, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use vigil_core::{
    run_session, ConnectionManager, DataProviders, IdentityVerifier, JwtVerifier, RejectAll,
};
use vigil_transport::websocket;

/// Shared server state.
pub struct AppState {
    /// The connection hub.
    pub manager: Arc<ConnectionManager>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create the app state and start the hub's supervisor.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured JWT algorithm is unknown.
    pub fn new(config: Config) -> Result<Self> {
        let verifier = build_verifier(&config)?;
        let manager = ConnectionManager::start(
            config.hub.manager_config(),
            verifier,
            DataProviders::with_defaults(),
        );

        Ok(Self { manager, config })
    }
}

fn build_verifier(config: &Config) -> Result<Arc<dyn IdentityVerifier>> {
    match &config.auth.jwt_secret {
        Some(secret) => {
            let algorithm = config
                .auth
                .algorithm
                .parse::<jsonwebtoken::Algorithm>()
                .with_context(|| format!("Unsupported JWT algorithm: {}", config.auth.algorithm))?;
            info!(algorithm = %config.auth.algorithm, "JWT verification enabled");
            Ok(Arc::new(JwtVerifier::new(secret.as_bytes(), algorithm)))
        }
        None => {
            warn!("No JWT secret configured; connections carrying a token will be rejected");
            Ok(Arc::new(RejectAll))
        }
    }
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    let ws_route = format!(
        "{}/:channel",
        state.config.transport.websocket_path.trim_end_matches('/')
    );

    Router::new()
        .route(&ws_route, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!(%addr, "Vigil server listening");
    info!(
        endpoint = %format!("ws://{addr}{}/<channel>", config.transport.websocket_path),
        "WebSocket endpoint"
    );

    let state = Arc::new(AppState::new(config)?);
    serve(listener, state, ctrl_c()).await
}

/// Serve on `listener` until `signal` resolves, then shut the hub down.
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    signal: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let manager = Arc::clone(&state.manager);
    let app = router(state);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        signal.await;
        info!("Shutdown signal received");
        manager.shutdown().await;
    })
    .await
    .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Registry statistics.
async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.manager.stats())
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    token: Option<String>,
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(channel): Path<String>,
    Query(params): Query<ConnectParams>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let remote = connect_info.map(|ConnectInfo(addr)| addr);
    ws.max_message_size(state.config.transport.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, channel, params.token, remote, state))
}

/// Admit an upgraded WebSocket and run its session.
async fn handle_websocket(
    socket: WebSocket,
    channel: String,
    token: Option<String>,
    remote: Option<SocketAddr>,
    state: Arc<AppState>,
) {
    let (sink, stream) =
        websocket::split(socket, remote, state.config.transport.max_message_size);

    let admitted = match state
        .manager
        .admit(Box::new(sink), &channel, token.as_deref())
        .await
    {
        Ok(admitted) => admitted,
        Err(e) => {
            debug!(channel = %channel, error = %e, "WebSocket not admitted");
            return;
        }
    };

    run_session(
        Arc::clone(&state.manager),
        admitted.connection_id,
        Box::new(stream),
    )
    .await;

    debug!(connection = %admitted.connection_id, "WebSocket disconnected");
}
