//! `LobbyServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use lobby_core::{ConnectionId, LobbyError, LobbyId};
use lobby_hub::{Connection, ConnectionHub, HubHandle};
use lobby_session::{StatsFeed, StatsSource};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::metrics::LOBBY_LIMIT_REJECTIONS_TOTAL;
use crate::registry::LobbyRegistry;
use crate::request_log::{self, RequestLog};
use crate::shutdown::ShutdownCoordinator;
use crate::socket;

/// Extra room the transport allows beyond the application message limit,
/// so slightly oversize messages reach the connection and are reported as
/// such instead of as protocol errors.
const TRANSPORT_SLACK: usize = 4096;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Open lobbies.
    pub registry: Arc<LobbyRegistry>,
    /// Hub serving the statistics feed, when enabled.
    pub stats_hub: Option<HubHandle>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Prometheus handle for `/metrics`.
    pub metrics: PrometheusHandle,
    /// When the server started.
    pub start_time: Instant,
}

/// The lobby server.
pub struct LobbyServer {
    config: Arc<ServerConfig>,
    registry: Arc<LobbyRegistry>,
    stats_hub: Option<HubHandle>,
    request_log: Arc<RequestLog>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: PrometheusHandle,
    start_time: Instant,
}

impl LobbyServer {
    /// Create a new server. Must be called inside a tokio runtime when the
    /// statistics feed is enabled, since its hub starts immediately.
    pub fn new(config: ServerConfig, metrics: PrometheusHandle) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let registry = LobbyRegistry::new(config.max_lobbies, Arc::clone(&shutdown));
        let request_log = Arc::new(RequestLog::new(config.request_log_capacity));

        let stats_hub = config.stats_enabled.then(|| {
            let source = Arc::clone(&request_log) as Arc<dyn StatsSource>;
            let interval = config.stats_interval;
            let (hub, task) = ConnectionHub::spawn_with(|weak| StatsFeed::start(source, weak, interval));
            shutdown.track(task);
            info!(hub_id = %hub.id(), ?interval, "statistics feed started");
            hub
        });

        Self {
            config: Arc::new(config),
            registry,
            stats_hub,
            request_log,
            shutdown,
            metrics,
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: Arc::clone(&self.registry),
            stats_hub: self.stats_hub.clone(),
            shutdown: Arc::clone(&self.shutdown),
            config: Arc::clone(&self.config),
            metrics: self.metrics.clone(),
            start_time: self.start_time,
        };

        let mut router = Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws/lobby/{user_id}/{lobby_id}", get(lobby_ws_handler));
        if self.stats_hub.is_some() {
            router = router.route("/ws/stats/{user_id}", get(stats_ws_handler));
        }
        router
            .route_layer(middleware::from_fn_with_state(
                Arc::clone(&self.request_log),
                request_log::track_requests,
            ))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port 0) and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router).with_graceful_shutdown(token.cancelled_owned());
            if let Err(err) = serve.await {
                error!(error = %err, "server stopped with error");
            }
        });
        info!(%addr, "lobby server listening");
        Ok((addr, handle))
    }

    /// Close every lobby and the statistics feed, stop accepting requests,
    /// and wait up to `timeout` for the hub tasks.
    pub async fn shutdown_gracefully(&self, timeout: Option<Duration>) -> bool {
        info!(lobbies = self.registry.len(), "shutting down");
        self.registry.close_all();
        if let Some(hub) = &self.stats_hub {
            hub.shutdown();
        }
        self.shutdown.graceful_shutdown(timeout).await
    }

    /// Open lobbies.
    pub fn registry(&self) -> &Arc<LobbyRegistry> {
        &self.registry
    }

    /// Hub serving the statistics feed, when enabled.
    pub fn stats_hub(&self) -> Option<&HubHandle> {
        self.stats_hub.as_ref()
    }

    /// Recorded HTTP requests.
    pub fn request_log(&self) -> &Arc<RequestLog> {
        &self.request_log
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats_members = state.stats_hub.as_ref().map_or(0, HubHandle::member_count);
    Json(health::health_check(
        state.start_time,
        state.shutdown.is_shutting_down(),
        state.registry.len(),
        state.registry.connections() + stats_members,
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    crate::metrics::render(&state.metrics)
}

/// GET /ws/lobby/{user_id}/{lobby_id}
async fn lobby_ws_handler(
    ws: WebSocketUpgrade,
    Path((user_id, lobby_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Response {
    let lobby_id = LobbyId::from(lobby_id);
    if let Err(err) = state.registry.admits(&lobby_id) {
        if matches!(err, LobbyError::LobbyLimit { .. }) {
            counter!(LOBBY_LIMIT_REJECTIONS_TOTAL).increment(1);
        }
        warn!(%lobby_id, %user_id, error = %err, "refusing lobby connection");
        return (StatusCode::SERVICE_UNAVAILABLE, err.to_string()).into_response();
    }

    let limit = state.config.connection.max_message_size.saturating_add(TRANSPORT_SLACK);
    ws.max_message_size(limit)
        .on_upgrade(move |socket| serve_lobby(socket, state, ConnectionId::from(user_id), lobby_id))
}

async fn serve_lobby(mut socket: WebSocket, state: AppState, conn_id: ConnectionId, lobby_id: LobbyId) {
    let options = state.config.connection.clone();
    let membership = match state.registry.join(&lobby_id, &conn_id, options.queue_capacity) {
        Ok(membership) => membership,
        Err(err) => {
            warn!(%lobby_id, %conn_id, error = %err, "cannot join lobby after upgrade");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    let (sink, stream) = socket::split(socket);
    let reason = Connection::new(membership.hub, conn_id.clone(), sink, stream, options)
        .registered(membership.key, membership.queue)
        .on_empty_shared(membership.on_empty)
        .run()
        .await;
    debug!(%lobby_id, %conn_id, reason = reason.as_str(), "lobby socket finished");
}

/// GET /ws/stats/{user_id}
async fn stats_ws_handler(
    ws: WebSocketUpgrade,
    Path(user_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    let Some(hub) = state.stats_hub.clone() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let options = state.config.connection.clone();
    let limit = options.max_message_size.saturating_add(TRANSPORT_SLACK);
    ws.max_message_size(limit).on_upgrade(move |socket| async move {
        let (sink, stream) = socket::split(socket);
        let conn_id = ConnectionId::from(user_id);
        let reason = Connection::new(hub, conn_id.clone(), sink, stream, options).run().await;
        debug!(%conn_id, reason = reason.as_str(), "stats socket finished");
    })
}
