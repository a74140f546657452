//! Prometheus metrics for ldapgate
//!
//! Exposes metrics at the `/metrics` endpoint in Prometheus format.

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use ldapgate_auth::telemetry::names as auth_names;
use ldapgate_core::{Error, Result};
use metrics::{counter, describe_counter, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Instant;
use tracing::debug;

use crate::server::AppState;

/// Metric names
pub mod names {
    pub const HTTP_REQUESTS_TOTAL: &str = "ldapgate_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "ldapgate_http_request_duration_seconds";
    pub const UPTIME_SECONDS: &str = "ldapgate_uptime_seconds";
    pub const INFO: &str = "ldapgate_info";
}

const DURATION_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

/// Metrics recorder
#[derive(Clone)]
pub struct MetricsRecorder {
    handle: PrometheusHandle,
    start_time: Instant,
}

impl MetricsRecorder {
    /// Install the Prometheus recorder for this process
    pub fn install() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                DURATION_BUCKETS,
            )
            .map_err(|e| Error::InternalError(format!("Invalid metric buckets: {}", e)))?
            .install_recorder()
            .map_err(|e| {
                Error::InternalError(format!("Failed to install Prometheus recorder: {}", e))
            })?;

        describe();
        gauge!(names::INFO, "version" => ldapgate_core::VERSION).set(1.0);

        Ok(Self::from_handle(handle))
    }

    /// Wrap a handle to a recorder installed elsewhere
    pub fn from_handle(handle: PrometheusHandle) -> Self {
        Self {
            handle,
            start_time: Instant::now(),
        }
    }

    /// Get metrics output in Prometheus format
    pub fn render(&self) -> String {
        gauge!(names::UPTIME_SECONDS).set(self.start_time.elapsed().as_secs_f64());

        self.handle.render()
    }

    /// Record an HTTP request
    pub fn record_http_request(&self, method: &str, status: u16, duration_secs: f64) {
        let status_class = format!("{}xx", status / 100);

        counter!(
            names::HTTP_REQUESTS_TOTAL,
            "method" => method.to_string(),
            "status" => status.to_string(),
            "status_class" => status_class
        )
        .increment(1);

        histogram!(
            names::HTTP_REQUEST_DURATION_SECONDS,
            "method" => method.to_string()
        )
        .record(duration_secs);
    }
}

fn describe() {
    describe_counter!(names::HTTP_REQUESTS_TOTAL, "HTTP requests served");
    describe_histogram!(
        names::HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request latency in seconds"
    );
    describe_counter!(auth_names::VERDICTS_TOTAL, "Authentication verdicts by outcome and reason");
    describe_counter!(auth_names::CACHE_HITS_TOTAL, "Verdict cache hits");
    describe_counter!(auth_names::CACHE_MISSES_TOTAL, "Verdict cache misses");
    describe_histogram!(
        auth_names::DIRECTORY_DURATION_SECONDS,
        "Directory check latency in seconds"
    );
}

/// Axum middleware for recording HTTP metrics
pub async fn metrics_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(metrics) = state.metrics.clone() else {
        return next.run(request).await;
    };

    let start = Instant::now();
    let method = request.method().to_string();

    let response = next.run(request).await;

    let status = response.status().as_u16();
    metrics.record_http_request(&method, status, start.elapsed().as_secs_f64());

    response
}

/// Handler for the `/metrics` endpoint
pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(metrics) => {
            debug!("Serving metrics");
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                metrics.render(),
            )
                .into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_recorded_requests() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let metrics = MetricsRecorder::from_handle(recorder.handle());

        metrics::with_local_recorder(&recorder, || {
            metrics.record_http_request("GET", 401, 0.002);
            metrics.record_http_request("GET", 200, 0.004);
        });

        let output = metrics.handle.render();
        assert!(output.contains(names::HTTP_REQUESTS_TOTAL));
        assert!(output.contains("status=\"401\""));
        assert!(output.contains("status_class=\"2xx\""));
    }
}
