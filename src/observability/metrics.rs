//! Metrics collection and exposition.
//!
//! # Metrics
//! - `fog_requests_total` (counter): handled requests by kind and status
//! - `fog_chain_builds_total` (counter): chain builds by outcome
//! - `fog_chain_build_duration_seconds` (histogram): time to establish a chain
//! - `fog_active_tunnels` (gauge): spliced tunnels currently open
//!
//! # Design Decisions
//! - Recording is always on; without an installed exporter the macros are no-ops
//! - The Prometheus listener is opt-in through configuration

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(err) => tracing::error!(address = %addr, error = %err, "Failed to install metrics exporter"),
    }
}

pub fn record_request(kind: &'static str, status: u16) {
    counter!("fog_requests_total", "kind" => kind, "status" => status.to_string()).increment(1);
}

pub fn record_chain_build(outcome: &'static str, started: Instant) {
    counter!("fog_chain_builds_total", "outcome" => outcome).increment(1);
    histogram!("fog_chain_build_duration_seconds").record(started.elapsed().as_secs_f64());
}

/// Counts one open tunnel in `fog_active_tunnels` for as long as it lives.
pub struct ActiveTunnel(());

impl ActiveTunnel {
    pub fn open() -> Self {
        gauge!("fog_active_tunnels").increment(1.0);
        Self(())
    }
}

impl Drop for ActiveTunnel {
    fn drop(&mut self) {
        gauge!("fog_active_tunnels").decrement(1.0);
    }
}
