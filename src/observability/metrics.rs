//! Metrics collection and exposition.
//!
//! # Metrics
//! - `nonce_allocations_total` (counter): nonces handed out, by chain and whether a stale slot was reused
//! - `nonce_reconciliations_total` (counter): ledger merges by chain and outcome
//! - `nonce_commits_total` (counter): commits by chain and outcome (accepted, rejected, reset)
//! - `nonce_pending_depth` (gauge): pending queue length of the last touched address

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Start the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_nonce_allocated(chain: &str, reused: bool) {
    ::metrics::counter!(
        "nonce_allocations_total",
        "chain" => chain.to_string(),
        "reused" => if reused { "true" } else { "false" }
    )
    .increment(1);
}

pub fn record_reconciliation(chain: &str, outcome: &'static str) {
    ::metrics::counter!("nonce_reconciliations_total", "chain" => chain.to_string(), "outcome" => outcome)
        .increment(1);
}

pub fn record_commit(chain: &str, outcome: &'static str) {
    ::metrics::counter!("nonce_commits_total", "chain" => chain.to_string(), "outcome" => outcome).increment(1);
}

pub fn record_pending_depth(chain: &str, depth: usize) {
    ::metrics::gauge!("nonce_pending_depth", "chain" => chain.to_string()).set(depth as f64);
}
