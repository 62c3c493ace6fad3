//! `PushServer`: the Axum HTTP surface of a hub.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use pushhub_core::Target;
use pushhub_settings::ServerSettings;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::{PublishRejection, ServerError};
use crate::health::{self, HealthResponse};
use crate::hub::Hub;
use crate::shutdown::ShutdownCoordinator;
use crate::sse::sse_handler;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The hub connections register with and publishes go through.
    pub hub: Arc<Hub>,
    /// When the server started.
    pub start_time: Instant,
    /// Event streams allowed at once.
    pub max_connections: usize,
    /// SSE keep-alive interval in seconds.
    pub keep_alive_secs: u64,
    /// Prometheus handle for `/metrics`, if a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// Body of `POST /publish`.
#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    /// Client to deliver to. `null`, absent or empty means broadcast.
    #[serde(default)]
    pub target: Option<String>,
    /// Opaque payload.
    pub payload: String,
}

/// The push hub HTTP server.
pub struct PushServer {
    settings: ServerSettings,
    hub: Arc<Hub>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl PushServer {
    /// Create a server in front of `hub`.
    pub fn new(settings: ServerSettings, hub: Arc<Hub>) -> Self {
        Self {
            settings,
            hub,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            metrics: None,
            start_time: Instant::now(),
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> axum::Router {
        let state = AppState {
            hub: self.hub.clone(),
            start_time: self.start_time,
            max_connections: self.settings.max_connections,
            keep_alive_secs: self.settings.keep_alive_secs,
            metrics: self.metrics.clone(),
        };

        axum::Router::new()
            .route("/sse", get(sse_handler))
            .route("/publish", post(publish_handler))
            .route("/ping/{id}", post(ping_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind the configured address and serve until shutdown is signalled.
    ///
    /// Returns the bound address and the task running the server. The task
    /// stops accepting once the shutdown coordinator fires and exits when the
    /// last open response finishes.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let addr = format!("{}:{}", self.settings.host, self.settings.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local = listener.local_addr().map_err(ServerError::Serve)?;

        let app = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(token.cancelled_owned())
                .await;
            if let Err(err) = served {
                error!(error = %ServerError::Serve(err), "http server stopped");
            }
        });
        info!(addr = %local, "push hub listening");
        Ok((local, handle))
    }

    /// The hub behind this server.
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server settings.
    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }
}

/// POST /publish
async fn publish_handler(
    State(state): State<AppState>,
    Json(request): Json<PublishRequest>,
) -> Result<StatusCode, PublishRejection> {
    let target = Target::from_optional(request.target.as_deref());
    state.hub.publish(target, request.payload).await?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /ping/{id}
async fn ping_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, PublishRejection> {
    let message = format!("Hello {id}");
    state.hub.publish(Target::client(id), message).await?;
    Ok(StatusCode::OK)
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = state.hub.registry();
    Json(health::health_check(
        state.start_time,
        registry.connection_count(),
        registry.client_count(),
        state.hub.bridge_state(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
