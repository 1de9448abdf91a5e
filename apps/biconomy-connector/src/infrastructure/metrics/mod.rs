//! Prometheus Metrics Module
//!
//! Counters and gauges for the reconciliation services and the user
//! stream, exposed at `/metrics` on the health server port.
//!
//! Recording is a no-op until `init_metrics` installs the recorder, so the
//! services can record unconditionally (tests included).

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder and register metric descriptions.
///
/// Later calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns `BuildError` when another recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Cancellation
    describe_counter!(
        "biconomy_cancel_outcomes_total",
        "Per-order cancel-all outcomes by result"
    );
    describe_counter!(
        "biconomy_batch_cancel_unacknowledged_total",
        "Bulk-cancel members routed to the single-cancel fallback"
    );

    // Reconciliation
    describe_counter!(
        "biconomy_resolutions_total",
        "Venue id resolution attempts by outcome"
    );
    describe_counter!(
        "biconomy_state_anomalies_total",
        "Conflicting order information by kind"
    );
    describe_counter!(
        "biconomy_malformed_payloads_total",
        "Venue payloads or records skipped as malformed"
    );
    describe_counter!("biconomy_trade_fills_total", "New fills forwarded to the tracker");

    // Stream
    describe_gauge!(
        "biconomy_stream_connected",
        "1 while the user stream is open, 0 otherwise"
    );
    describe_counter!(
        "biconomy_stream_interruptions_total",
        "User stream interruptions by reason"
    );
    describe_counter!(
        "biconomy_stream_reconnects_total",
        "User stream reconnection attempts"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record one order's cancel-all outcome (`canceled` or `failed`).
pub fn record_cancel_outcome(outcome: &'static str) {
    counter!("biconomy_cancel_outcomes_total", "outcome" => outcome).increment(1);
}

/// Record bulk-cancel members that were not acknowledged.
pub fn record_batch_partial_failure(unacknowledged: usize) {
    counter!("biconomy_batch_cancel_unacknowledged_total")
        .increment(u64::try_from(unacknowledged).unwrap_or(u64::MAX));
}

/// Record a resolution outcome (`resolved`, `unresolved`, `failed`).
pub fn record_resolution(outcome: &'static str) {
    counter!("biconomy_resolutions_total", "outcome" => outcome).increment(1);
}

/// Record conflicting order information (`terminal_conflict`, `venue_id_conflict`).
pub fn record_state_anomaly(kind: &'static str) {
    counter!("biconomy_state_anomalies_total", "kind" => kind).increment(1);
}

/// Record a skipped payload or record.
pub fn record_malformed_payload(source: &'static str) {
    counter!("biconomy_malformed_payloads_total", "source" => source).increment(1);
}

/// Record a newly forwarded fill.
pub fn record_trade_fill() {
    counter!("biconomy_trade_fills_total").increment(1);
}

/// Mark the user stream open or closed.
pub fn set_stream_connected(connected: bool) {
    gauge!("biconomy_stream_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Record a user stream interruption.
pub fn record_stream_interruption(reason: &'static str) {
    counter!("biconomy_stream_interruptions_total", "reason" => reason).increment(1);
}

/// Record a user stream reconnection attempt.
pub fn record_reconnect() {
    counter!("biconomy_stream_reconnects_total").increment(1);
}
