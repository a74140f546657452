//! Gateway server implementation

use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{any, get},
    Json, Router,
};
use ldapgate_core::{GatewayConfig, Result};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};
use tracing::{info, warn};

use crate::metrics::{metrics_handler, metrics_middleware, MetricsRecorder};
use crate::middleware::{ldap_auth, EngineRoutes};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engines: Arc<EngineRoutes>,
    pub metrics: Option<Arc<MetricsRecorder>>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(engines: EngineRoutes) -> Self {
        Self {
            engines: Arc::new(engines),
            metrics: None,
            start_time: Instant::now(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

/// Build the HTTP router
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/auth", any(auth_check))
        .route_layer(middleware::from_fn_with_state(state.clone(), ldap_auth));

    Router::new()
        // Probes (no auth required)
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .merge(protected)
        .layer(middleware::from_fn_with_state(state.clone(), metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
        .with_state(state)
}

/// Reached only once the middleware allowed the request
async fn auth_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": ldapgate_core::VERSION,
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// Gateway server
pub struct GatewayServer {
    config: GatewayConfig,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig) -> Self {
        Self { config }
    }

    pub async fn run(self) -> Result<()> {
        let engines = EngineRoutes::from_config(&self.config)?;

        let metrics = Arc::new(MetricsRecorder::install()?);
        info!("Prometheus metrics initialized");

        let app = router(AppState::new(engines).with_metrics(metrics));
        let addr = format!("{}:{}", self.config.server.bind_address, self.config.server.port);
        let listener = TcpListener::bind(&addr).await?;

        info!("ldapgate listening on http://{}", addr);
        info!("Auth check endpoint at http://{}/auth", addr);
        info!("Prometheus metrics at http://{}/metrics", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("ldapgate stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
