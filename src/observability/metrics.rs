//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status
//! - `gateway_request_duration_seconds` (histogram): latency distribution
//! - `gateway_open_connections` (gauge): current connection count
//! - `gateway_heartbeats_total` (counter): `102 Processing` signals sent
//! - `gateway_probe_failures_total` (counter): probes answered 503, by probe
//! - `gateway_fatal_errors_total` (counter): reported fatal errors, by origin
//!
//! Recording is a no-op until a recorder is installed with [`init_metrics`].

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    let status = status.to_string();
    counter!("gateway_requests_total", "method" => method.to_string(), "status" => status.clone())
        .increment(1);
    histogram!("gateway_request_duration_seconds", "method" => method.to_string(), "status" => status)
        .record(start.elapsed().as_secs_f64());
}

pub fn set_open_connections(open: usize) {
    gauge!("gateway_open_connections").set(open as f64);
}

pub fn record_heartbeat() {
    counter!("gateway_heartbeats_total").increment(1);
}

pub fn record_probe_failure(probe: &'static str) {
    counter!("gateway_probe_failures_total", "probe" => probe).increment(1);
}

pub fn record_fatal_error(origin: &'static str) {
    counter!("gateway_fatal_errors_total", "origin" => origin).increment(1);
}
