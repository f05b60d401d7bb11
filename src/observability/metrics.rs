//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status, disposition
//! - `gateway_request_duration_seconds` (histogram): latency by disposition
//!
//! Recording is a no-op until a recorder is installed.

use std::net::SocketAddr;
use std::time::Duration;

use axum::http::Method;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

/// Record one completed request. `status` is `None` for aborted responses.
pub fn record_request(method: &Method, status: Option<u16>, disposition: &'static str, elapsed: Duration) {
    let status = status.map_or_else(|| "aborted".to_string(), |code| code.to_string());

    metrics::counter!(
        "gateway_requests_total",
        "method" => method_label(method),
        "status" => status,
        "disposition" => disposition
    )
    .increment(1);

    metrics::histogram!(
        "gateway_request_duration_seconds",
        "disposition" => disposition
    )
    .record(elapsed.as_secs_f64());
}

/// Bounded label for `method`. Extension methods share one label.
fn method_label(method: &Method) -> &'static str {
    match method.as_str() {
        "GET" => "GET",
        "HEAD" => "HEAD",
        "POST" => "POST",
        "PUT" => "PUT",
        "DELETE" => "DELETE",
        "PATCH" => "PATCH",
        "OPTIONS" => "OPTIONS",
        "CONNECT" => "CONNECT",
        "TRACE" => "TRACE",
        _ => "other",
    }
}
