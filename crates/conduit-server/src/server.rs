//! `GatewayServer`: Axum HTTP + WebSocket server.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use conduit_auth::Authenticator;
use conduit_core::attributes::{GROUP, SECRET_KEY, TOKEN};
use conduit_core::{ConnectionId, HandshakeAttributes};
use conduit_directory::{LocalDirectory, SessionCache};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::dispatch::{DispatchEngine, ProcessorRegistry};
use crate::health::{self, HealthResponse};
use crate::lifecycle::LifecycleController;
use crate::metrics::CONNECTIONS_REJECTED_TOTAL;
use crate::reconcile::Reconciler;
use crate::session::run_ws_session;
use crate::shutdown::ShutdownCoordinator;

/// Collaborators a server is built from.
pub struct GatewayDeps {
    /// Resolves bearer credentials.
    pub authenticator: Arc<dyn Authenticator>,
    /// This node's directory.
    pub directory: Arc<LocalDirectory>,
    /// Shared session cache.
    pub cache: SessionCache,
    /// Processors that receive inbound frames.
    pub processors: Arc<ProcessorRegistry>,
}

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Connection lifecycle controller.
    pub lifecycle: Arc<LifecycleController>,
    /// Frame dispatch engine.
    pub dispatch: Arc<DispatchEngine>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for rendering `/metrics`.
    pub metrics_handle: PrometheusHandle,
}

/// A gateway node's network front end.
pub struct GatewayServer {
    state: AppState,
    processors: Arc<ProcessorRegistry>,
}

impl GatewayServer {
    /// Create a server.
    pub fn new(config: ServerConfig, deps: GatewayDeps, metrics_handle: PrometheusHandle) -> Self {
        let lifecycle = Arc::new(LifecycleController::new(
            Arc::clone(&deps.authenticator),
            Arc::clone(&deps.directory),
            deps.cache,
            config.lock_timeout(),
        ));
        let dispatch = Arc::new(DispatchEngine::new(
            Arc::clone(&deps.processors),
            deps.authenticator,
            deps.directory,
            config.heartbeat.clone(),
            config.processor_timeout(),
        ));
        Self {
            state: AppState {
                config: Arc::new(config),
                lifecycle,
                dispatch,
                shutdown: Arc::new(ShutdownCoordinator::new()),
                start_time: Instant::now(),
                metrics_handle,
            },
            processors: deps.processors,
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route(&self.state.config.ws_path, get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind the listener and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.state.config.host, self.state.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        let router = self.router();
        let token = self.state.shutdown.token();

        info!(
            %local_addr,
            ws_path = %self.state.config.ws_path,
            broker_id = %self.directory().broker_id(),
            "gateway listening"
        );

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                warn!(error = %e, "server stopped with error");
            }
        });
        Ok((local_addr, handle))
    }

    /// Start the cache reconciliation task. It stops on shutdown.
    pub fn spawn_reconciler(&self) -> JoinHandle<()> {
        let reconciler = Reconciler::new(
            Arc::clone(&self.state.lifecycle),
            self.state.config.reconcile_interval(),
        );
        tokio::spawn(reconciler.run(self.state.shutdown.token()))
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// The lifecycle controller.
    pub fn lifecycle(&self) -> &Arc<LifecycleController> {
        &self.state.lifecycle
    }

    /// This node's directory.
    pub fn directory(&self) -> &Arc<LocalDirectory> {
        self.state.lifecycle.directory()
    }

    /// The shared session cache.
    pub fn cache(&self) -> &SessionCache {
        self.state.lifecycle.cache()
    }

    /// The processor registry; processors may be added or removed at any
    /// time.
    pub fn processors(&self) -> &Arc<ProcessorRegistry> {
        &self.processors
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }
}

/// Map upgrade request parameters to handshake attributes.
///
/// `access_token` or `token` (or an `Authorization: Bearer` header) becomes
/// the credential; `secretKey` and `group` are copied as-is.
pub fn handshake_attributes(
    query: &HashMap<String, String>,
    headers: &HeaderMap,
) -> HandshakeAttributes {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.strip_prefix("Bearer ")
                .or_else(|| v.strip_prefix("bearer "))
        })
        .map(str::trim);

    let token = query
        .get("access_token")
        .or_else(|| query.get(TOKEN))
        .map(String::as_str)
        .or(bearer);

    let mut attrs = HandshakeAttributes::new();
    if let Some(token) = token.filter(|t| !t.is_empty()) {
        attrs = attrs.with(TOKEN, token);
    }
    for key in [SECRET_KEY, GROUP] {
        if let Some(value) = query.get(key) {
            attrs = attrs.with(key, value.as_str());
        }
    }
    attrs
}

/// GET `{ws_path}`: WebSocket upgrade.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let attributes = handshake_attributes(&query, &headers);

    let secret_mismatch = state
        .config
        .secret_key
        .as_deref()
        .zip(attributes.secret_key())
        .is_some_and(|(expected, given)| expected != given);
    if secret_mismatch {
        debug!("handshake rejected, shared secret mismatch");
        counter!(CONNECTIONS_REJECTED_TOTAL, "reason" => "handshake").increment(1);
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let id = ConnectionId::generate();
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| {
            let shutdown = Arc::clone(&state.shutdown);
            shutdown.track_session(run_ws_session(socket, id, attributes, state))
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let directory = state.lifecycle.directory();
    Json(health::health_check(
        state.start_time,
        directory.broker_id(),
        state.shutdown.open_sessions(),
        directory.user_count(),
        directory.group_count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    crate::metrics::render(&state.metrics_handle)
}
