//! Prometheus exposition for the allocator API.
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `subenv_http_requests_total` | Counter | `route`, `method`, `status` | Requests by matched route and status code |
//! | `subenv_http_request_duration_seconds` | Histogram | `route`, `method` | Request latency; allocations include the readiness wait |
//! | `subenv_api_errors_total` | Counter | `code` | Error responses by API error code |
//! | `subenv_webhooks_total` | Counter | `result` | Deployment webhooks: `notified`, `ignored`, `failed` or `rejected` |
//!
//! Engine metrics (`subenv_allocations_total` and friends) are recorded by
//! `subenv-engine` through the same recorder and described here.

use std::sync::OnceLock;
use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use subenv_core::{Error, Result};
use subenv_engine::CallbackOutcome;
use subenv_engine::metrics::names;

/// Counter: requests by route, method and status code.
pub const HTTP_REQUESTS_TOTAL: &str = "subenv_http_requests_total";
/// Histogram: request latency in seconds.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "subenv_http_request_duration_seconds";
/// Counter: error responses by API error code.
pub const API_ERRORS_TOTAL: &str = "subenv_api_errors_total";
/// Counter: deployment webhooks by result.
pub const WEBHOOKS_TOTAL: &str = "subenv_webhooks_total";

const UNMATCHED_ROUTE: &str = "unmatched";

static PROMETHEUS: OnceLock<std::result::Result<PrometheusHandle, String>> = OnceLock::new();

/// Installs the Prometheus recorder and describes every metric.
///
/// Later calls return the handle from the first one.
///
/// # Errors
///
/// Returns `Error::Internal` if another global recorder was installed first.
pub fn init_metrics() -> Result<PrometheusHandle> {
    PROMETHEUS
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .map_err(|e| e.to_string())?;
            describe_api_metrics();
            describe_engine_metrics();
            tracing::info!("Prometheus metrics recorder installed");
            Ok(handle)
        })
        .clone()
        .map_err(|message| Error::Internal {
            message: format!("failed to install prometheus recorder: {message}"),
        })
}

fn describe_api_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "HTTP requests by route and status code");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request latency in seconds"
    );
    describe_counter!(API_ERRORS_TOTAL, "Error responses by API error code");
    describe_counter!(WEBHOOKS_TOTAL, "Deployment webhooks by result");
}

fn describe_engine_metrics() {
    describe_counter!(names::ALLOCATIONS_TOTAL, "Allocation requests by outcome");
    describe_histogram!(
        names::ALLOCATION_DURATION_SECONDS,
        "End-to-end allocation latency in seconds"
    );
    describe_histogram!(
        names::READINESS_WAIT_SECONDS,
        "Time spent waiting for a new environment to become ready"
    );
    describe_gauge!(
        names::POOL_FREE_SLOTS,
        "Free slots seen at the last provisioning"
    );
    describe_counter!(names::SYNC_TOTAL, "Per-environment reconciliation results");
    describe_counter!(names::DEPLOYMENTS_TOTAL, "Deployment task submissions");
    describe_counter!(names::CALLBACKS_TOTAL, "Webhook callbacks handled");
    describe_counter!(names::NOTIFICATIONS_TOTAL, "Chat notifications sent");
}

/// Route template of a request, so `/environments/test4` and
/// `/environments/test7` share one series.
fn route_label<B>(request: &Request<B>) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| UNMATCHED_ROUTE.to_string(), |p| p.as_str().to_string())
}

/// Records count and latency of every request.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let route = route_label(&request);
    let method = request.method().as_str().to_string();

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    counter!(
        HTTP_REQUESTS_TOTAL,
        "route" => route.clone(),
        "method" => method.clone(),
        "status" => status,
    )
    .increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "route" => route, "method" => method)
        .record(started.elapsed().as_secs_f64());
    response
}

/// Counts an error response by its API error code.
pub fn record_api_error(code: &'static str) {
    counter!(API_ERRORS_TOTAL, "code" => code).increment(1);
}

/// Counts a webhook that was handled, successfully or not.
pub fn record_webhook(outcome: std::result::Result<&CallbackOutcome, &Error>) {
    let result = match outcome {
        Ok(CallbackOutcome::Notified { .. }) => "notified",
        Ok(CallbackOutcome::Ignored { .. }) => "ignored",
        Err(_) => "failed",
    };
    counter!(WEBHOOKS_TOTAL, "result" => result).increment(1);
}

/// Counts a webhook payload that did not parse.
pub fn record_webhook_rejected() {
    counter!(WEBHOOKS_TOTAL, "result" => "rejected").increment(1);
}

/// `GET /metrics` in Prometheus text format.
pub async fn serve_metrics() -> impl IntoResponse {
    let content_type = [("content-type", "text/plain; version=0.0.4")];
    match PROMETHEUS.get() {
        Some(Ok(handle)) => (StatusCode::OK, content_type, handle.render()),
        _ => (
            StatusCode::SERVICE_UNAVAILABLE,
            content_type,
            "metrics recorder not installed".to_string(),
        ),
    }
}
