//! LDAP Basic authentication middleware

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use ldapgate_auth::{Engine, HeaderStatus, LocalReply, Resume};
use ldapgate_core::{GatewayConfig, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::server::AppState;

/// Path of the original request when running behind an `auth_request` proxy
const ORIGINAL_URI: &str = "x-original-uri";

/// Authentication engines keyed by path prefix
pub struct EngineRoutes {
    default: Arc<Engine>,
    /// Longest prefix first
    routes: Vec<(String, Arc<Engine>)>,
}

impl EngineRoutes {
    pub fn new(default: Arc<Engine>) -> Self {
        Self {
            default,
            routes: Vec::new(),
        }
    }

    /// Use `engine` for paths under `prefix`
    pub fn with_route(mut self, prefix: impl Into<String>, engine: Arc<Engine>) -> Self {
        self.routes.push((prefix.into(), engine));
        self.routes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        self
    }

    /// Build the default engine from `[ldap]` and one engine per `[[routes]]`
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let realm = &config.server.realm;
        let default = Engine::from_config(&config.ldap)?.with_realm(realm.clone());
        let mut routes = Self::new(Arc::new(default));

        for (prefix, filter) in config.route_filters() {
            let engine = Engine::from_config(&filter)?.with_realm(realm.clone());
            info!("Route {} uses its own directory settings", prefix);
            routes = routes.with_route(prefix, Arc::new(engine));
        }

        Ok(routes)
    }

    /// Engine responsible for `path`
    pub fn select(&self, path: &str) -> &Arc<Engine> {
        self.routes
            .iter()
            .find(|(prefix, _)| prefix_matches(prefix, path))
            .map(|(_, engine)| engine)
            .unwrap_or(&self.default)
    }
}

fn prefix_matches(prefix: &str, path: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || prefix.ends_with('/'),
        None => false,
    }
}

/// Path used for route selection: `X-Original-URI` when present, else the request path
fn request_path(request: &Request<Body>) -> String {
    request
        .headers()
        .get(ORIGINAL_URI)
        .and_then(|v| v.to_str().ok())
        .map(|uri| uri.split(['?', '#']).next().unwrap_or(uri).to_string())
        .unwrap_or_else(|| request.uri().path().to_string())
}

/// LDAP authentication middleware
///
/// Runs the engine for the request's path. Denied requests get a 401 with
/// the reason as a plain text body and a Basic challenge; allowed ones go
/// on to the inner service.
pub async fn ldap_auth(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request_path(&request);
    let engine = state.engines.select(&path);

    let resume = match engine.on_request_headers(request.headers()) {
        HeaderStatus::Continue => Resume::Continue,
        HeaderStatus::Pending(pending) => pending.await,
    };

    match resume {
        Resume::Continue => next.run(request).await,
        Resume::Terminate(reply) => {
            debug!("Denied {}: {}", path, reply.body);
            local_reply(reply)
        }
    }
}

fn local_reply(reply: LocalReply) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );

    for (name, value) in &reply.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!("Dropping invalid reply header {}", name),
        }
    }

    (reply.status, headers, reply.body).into_response()
}
