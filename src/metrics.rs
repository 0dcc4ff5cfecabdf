//! Prometheus metrics for application observability.
//!
//! Metrics are exposed via a dedicated HTTP listener (default port 9090).
//!
//! # Available Metrics
//!
//! ## Counters
//! - `skygate_rate_limit_decisions_total` - Rate limit checks (labels: policy, outcome)
//! - `skygate_rate_limit_store_failures_total` - Store errors that triggered fail-open (labels: policy)
//! - `skygate_csrf_validations_total` - Form token checks (labels: outcome)
//! - `skygate_session_checks_total` - Session guard decisions (labels: outcome)
//! - `skygate_gate_outcomes_total` - Request gate results (labels: action, outcome)
//! - `skygate_audit_delivery_failures_total` - Audit events that could not be delivered
//!
//! ## Histograms
//! - `skygate_store_duration_seconds` - Store round trip duration (labels: op)
//!
//! # Usage
//!
//! ```rust,ignore
//! use skygate::metrics::{init_metrics, record_gate_outcome};
//!
//! init_metrics(addr)?;
//! record_gate_outcome("sign-in", "success");
//! ```
//!
//! Recording functions are no-ops until a recorder is installed, so library
//! users and tests need not initialize anything.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const RATE_LIMIT_DECISIONS_TOTAL: &str = "skygate_rate_limit_decisions_total";
    pub const RATE_LIMIT_STORE_FAILURES_TOTAL: &str = "skygate_rate_limit_store_failures_total";
    pub const CSRF_VALIDATIONS_TOTAL: &str = "skygate_csrf_validations_total";
    pub const SESSION_CHECKS_TOTAL: &str = "skygate_session_checks_total";
    pub const GATE_OUTCOMES_TOTAL: &str = "skygate_gate_outcomes_total";
    pub const AUDIT_DELIVERY_FAILURES_TOTAL: &str = "skygate_audit_delivery_failures_total";
    pub const STORE_DURATION_SECONDS: &str = "skygate_store_duration_seconds";
}

/// Initialize the Prometheus metrics exporter.
///
/// # Errors
///
/// Returns a message if the exporter cannot be installed (e.g. port in use).
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::RATE_LIMIT_DECISIONS_TOTAL,
        "Rate limit checks by policy and outcome"
    );
    describe_counter!(
        names::RATE_LIMIT_STORE_FAILURES_TOTAL,
        "Rate limit checks that failed open because the store was unavailable"
    );
    describe_counter!(
        names::CSRF_VALIDATIONS_TOTAL,
        "CSRF form token validations by outcome"
    );
    describe_counter!(
        names::SESSION_CHECKS_TOTAL,
        "Session guard decisions by outcome"
    );
    describe_counter!(
        names::GATE_OUTCOMES_TOTAL,
        "Request gate results by action and outcome"
    );
    describe_counter!(
        names::AUDIT_DELIVERY_FAILURES_TOTAL,
        "Audit events dropped after a delivery failure or timeout"
    );
    describe_histogram!(
        names::STORE_DURATION_SECONDS,
        "Backing store round trip duration in seconds"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

pub fn record_rate_limit_decision(policy: &str, allowed: bool) {
    let outcome = if allowed { "allowed" } else { "rejected" };
    counter!(names::RATE_LIMIT_DECISIONS_TOTAL, "policy" => policy.to_string(), "outcome" => outcome)
        .increment(1);
}

pub fn record_rate_limit_store_failure(policy: &str) {
    counter!(names::RATE_LIMIT_STORE_FAILURES_TOTAL, "policy" => policy.to_string()).increment(1);
}

pub fn record_csrf_validation(valid: bool) {
    let outcome = if valid { "valid" } else { "invalid" };
    counter!(names::CSRF_VALIDATIONS_TOTAL, "outcome" => outcome).increment(1);
}

/// `outcome` is one of `granted`, `missing`, `revoked`, `invalid`, `store_error`.
pub fn record_session_check(outcome: &'static str) {
    counter!(names::SESSION_CHECKS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_gate_outcome(action: &'static str, outcome: &'static str) {
    counter!(names::GATE_OUTCOMES_TOTAL, "action" => action, "outcome" => outcome).increment(1);
}

pub fn record_audit_delivery_failure() {
    counter!(names::AUDIT_DELIVERY_FAILURES_TOTAL).increment(1);
}

pub fn record_store_duration(op: &'static str, duration_secs: f64) {
    histogram!(names::STORE_DURATION_SECONDS, "op" => op).record(duration_secs);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_are_prefixed() {
        for name in [
            names::RATE_LIMIT_DECISIONS_TOTAL,
            names::RATE_LIMIT_STORE_FAILURES_TOTAL,
            names::CSRF_VALIDATIONS_TOTAL,
            names::SESSION_CHECKS_TOTAL,
            names::GATE_OUTCOMES_TOTAL,
            names::AUDIT_DELIVERY_FAILURES_TOTAL,
            names::STORE_DURATION_SECONDS,
        ] {
            assert!(name.starts_with("skygate_"), "{name}");
        }
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_rate_limit_decision("sign-in", true);
        record_session_check("granted");
        record_gate_outcome("sign-out", "success");
        record_store_duration("ping", 0.001);
    }
}
