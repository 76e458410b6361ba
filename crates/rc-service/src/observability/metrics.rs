//! Metrics definitions for the Room Controller.
//!
//! All metrics follow Prometheus naming conventions:
//! - `rc_` prefix for Room Controller
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `result`: 2 values (granted, denied)
//! - `reason`: bounded by the callout error taxonomy plus `none`
//! - `category`: 5 feature categories
//! - `status`: bounded by code (created, existing, error / success, error)
//! - `effect`: bounded by the fail-open side channels
//! - `operation`: bounded by repository methods

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return the handle served on
/// `/metrics`. Must run before any metric is recorded.
///
/// # Errors
///
/// Returns error if the recorder cannot be installed (e.g., already
/// installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Callout latency: several store round trips plus signing
        .set_buckets_for_metric(
            Matcher::Prefix("rc_auth_callout".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500,
            ],
        )
        .map_err(|e| format!("Failed to set callout latency buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("rc_db".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set DB latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// Authorization Callout Metrics
// ============================================================================

/// Record an authorization decision.
///
/// Metric: `rc_auth_callout_total`, `rc_auth_callout_duration_seconds`
/// Labels: `result`, `reason`
pub fn record_auth_callout(result: &str, reason: &str, duration: Duration) {
    histogram!("rc_auth_callout_duration_seconds",
        "result" => result.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("rc_auth_callout_total",
        "result" => result.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record one per-category consumer provisioning attempt.
///
/// Metric: `rc_consumer_provisioning_total`
/// Labels: `category`, `status`
pub fn record_consumer_provisioning(category: &str, status: &str) {
    counter!("rc_consumer_provisioning_total",
        "category" => category.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

// ============================================================================
// State Sync Metrics
// ============================================================================

/// Record a failure in a fail-open side channel.
///
/// Metric: `rc_side_effect_failures_total`
/// Labels: `effect`
///
/// Effects: relational_flag, metadata_update, metadata_broadcast,
/// info_notification, room_context, audit_file
pub fn record_side_effect_failure(effect: &str) {
    counter!("rc_side_effect_failures_total",
        "effect" => effect.to_string()
    )
    .increment(1);
}

// ============================================================================
// Database Metrics
// ============================================================================

/// Record relational query execution.
///
/// Metric: `rc_db_query_duration_seconds`
/// Labels: `operation`, `status`
pub fn record_db_query(operation: &str, status: &str, duration: Duration) {
    histogram!("rc_db_query_duration_seconds",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // These execute against the global no-op recorder when none is installed;
    // the point is that recording never panics.

    #[test]
    fn test_record_auth_callout() {
        record_auth_callout("granted", "none", Duration::from_millis(12));
        record_auth_callout("denied", "authentication", Duration::from_millis(3));
        record_auth_callout("denied", "provisioning", Duration::from_millis(40));
    }

    #[test]
    fn test_record_consumer_provisioning() {
        for category in ["chat", "system_public", "system_private", "whiteboard", "data_channel"] {
            record_consumer_provisioning(category, "created");
            record_consumer_provisioning(category, "existing");
        }
        record_consumer_provisioning("chat", "error");
    }

    #[test]
    fn test_record_side_effect_failure() {
        for effect in [
            "relational_flag",
            "metadata_update",
            "metadata_broadcast",
            "info_notification",
            "room_context",
            "audit_file",
        ] {
            record_side_effect_failure(effect);
        }
    }

    #[test]
    fn test_record_db_query() {
        record_db_query("update_room_status", "success", Duration::from_millis(4));
        record_db_query("insert_recording", "error", Duration::from_millis(9));
    }

    #[test]
    fn test_metrics_reach_installed_recorder() {
        use metrics_util::debugging::DebuggingRecorder;

        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_auth_callout("granted", "none", Duration::from_millis(12));
            record_consumer_provisioning("chat", "created");
            record_side_effect_failure("audit_file");
            record_db_query("insert_recording", "success", Duration::from_millis(2));
        });

        let metrics = snapshotter.snapshot().into_vec();
        assert!(
            metrics.len() >= 5,
            "expected every recorded series, got {}",
            metrics.len()
        );
    }
}
