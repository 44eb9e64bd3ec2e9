//! Metrics collection and exposition.
//!
//! # Metrics
//! - `frame_outstanding_work` (gauge): accept loops plus in-flight handlers
//! - `frame_requests_total` (counter): dispatched requests by endpoint, outcome
//! - `frame_handler_faults_total` (counter): intercepted handler panics by path
//! - `frame_bind_failures_total` (counter): refused listening sockets by port
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade and is a no-op until an
//!   exporter is installed
//! - The Prometheus exporter is opt-in via config

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter with its own scrape listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_request(endpoint: &str, outcome: &'static str) {
    metrics::counter!(
        "frame_requests_total",
        "endpoint" => endpoint.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_handler_fault(path: &str) {
    metrics::counter!("frame_handler_faults_total", "path" => path.to_string()).increment(1);
}

pub fn record_bind_failure(port: u16) {
    metrics::counter!("frame_bind_failures_total", "port" => port.to_string()).increment(1);
}
