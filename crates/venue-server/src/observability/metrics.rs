//! Metrics definitions for the venue server.
//!
//! All metrics follow Prometheus naming conventions:
//! - `venue_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `actor_type`: 3 values (controller, venue, connection)
//! - `procedure`: bounded by the procedure table (~40 values)
//! - `operation`: bounded by store/media trait methods (~15 values each)
//! - `guard`: 6 values
//! - `slot`: bounded by notification slot names (~8 values)
//! - `kind`: bounded by error classes (7 values)

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Request handling happens in-process apart from collaborator calls
        .set_buckets_for_metric(
            Matcher::Prefix("venue_request".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set request latency buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("venue_store".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set store latency buckets: {e}"))?
        // Router creation can take longer than transport calls
        .set_buckets_for_metric(
            Matcher::Prefix("venue_media".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000,
            ],
        )
        .map_err(|e| format!("Failed to set media latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Gauges
// ============================================================================

/// Set the number of active websocket connections.
///
/// Metric: `venue_connections_active`
pub fn set_connections_active(count: u64) {
    // u64 to f64 conversion is safe for realistic connection counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("venue_connections_active").set(count as f64);
}

/// Set the number of loaded venues.
///
/// Metric: `venue_venues_loaded`
pub fn set_venues_loaded(count: u64) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("venue_venues_loaded").set(count as f64);
}

/// Set the mailbox depth for an actor type.
///
/// Metric: `venue_actor_mailbox_depth`
/// Labels: `actor_type` (controller, venue, connection)
pub fn set_actor_mailbox_depth(actor_type: &str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("venue_actor_mailbox_depth", "actor_type" => actor_type.to_string()).set(depth as f64);
}

// ============================================================================
// Histograms
// ============================================================================

/// Record protocol request handling latency.
///
/// Metric: `venue_request_latency_seconds`
/// Labels: `procedure`, `status` (success, error)
pub fn record_request_latency(procedure: &str, success: bool, duration: Duration) {
    let status = if success { "success" } else { "error" };
    histogram!(
        "venue_request_latency_seconds",
        "procedure" => procedure.to_string(),
        "status" => status
    )
    .record(duration.as_secs_f64());
}

/// Record persistence store call latency.
///
/// Metric: `venue_store_latency_seconds`
/// Labels: `operation`
pub fn record_store_latency(operation: &str, duration: Duration) {
    histogram!("venue_store_latency_seconds", "operation" => operation.to_string())
        .record(duration.as_secs_f64());
}

/// Record media collaborator call latency.
///
/// Metric: `venue_media_latency_seconds`
/// Labels: `operation`
pub fn record_media_latency(operation: &str, duration: Duration) {
    histogram!("venue_media_latency_seconds", "operation" => operation.to_string())
        .record(duration.as_secs_f64());
}

// ============================================================================
// Counters
// ============================================================================

/// Record a request rejected by an authorization guard.
///
/// Metric: `venue_guard_rejections_total`
/// Labels: `guard`
pub fn record_guard_rejection(guard: &str) {
    counter!("venue_guard_rejections_total", "guard" => guard.to_string()).increment(1);
}

/// Record a state push dropped because the connection's outbound queue was
/// full or closed.
///
/// Metric: `venue_pushes_dropped_total`
/// Labels: `slot`
pub fn record_push_dropped(slot: &str) {
    counter!("venue_pushes_dropped_total", "slot" => slot.to_string()).increment(1);
}

/// Record a malformed inbound frame.
///
/// Metric: `venue_protocol_violations_total`
/// Labels: `reason` (parse, unexpected_type, missing_id, unknown_subject, binary, backlog)
pub fn record_protocol_violation(reason: &str) {
    counter!("venue_protocol_violations_total", "reason" => reason.to_string()).increment(1);
}

/// Record a failed request by error class.
///
/// Metric: `venue_errors_total`
/// Labels: `kind`
pub fn record_error(kind: &str) {
    counter!("venue_errors_total", "kind" => kind.to_string()).increment(1);
}

/// Record an actor panic event.
///
/// Metric: `venue_actor_panics_total`
/// Labels: `actor_type`
///
/// Any non-zero value indicates a bug.
pub fn record_actor_panic(actor_type: &str) {
    counter!("venue_actor_panics_total", "actor_type" => actor_type.to_string()).increment(1);
}

/// Record a venue unload.
///
/// Metric: `venue_unloads_total`
pub fn record_venue_unloaded() {
    counter!("venue_unloads_total").increment(1);
}
