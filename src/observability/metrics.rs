//! Metrics collection and exposition.
//!
//! # Metrics
//! - `admission_requests_total` (counter): admission decisions by `decision`
//! - `admission_abuse_signals_total` (counter): suspected-abuse events
//! - `admission_tracked_identities` (gauge): identities holding a bucket
//! - `upstream_requests_total` (counter): forwarded requests by `status`
//! - `upstream_request_duration_seconds` (histogram): upstream latency

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_admission(decision: &'static str) {
    counter!("admission_requests_total", "decision" => decision).increment(1);
}

pub fn record_abuse_signal() {
    counter!("admission_abuse_signals_total").increment(1);
}

pub fn record_tracked_identities(count: usize) {
    gauge!("admission_tracked_identities").set(count as f64);
}

pub fn record_upstream(status: u16, start: Instant) {
    counter!("upstream_requests_total", "status" => status.to_string()).increment(1);
    histogram!("upstream_request_duration_seconds").record(start.elapsed().as_secs_f64());
}
