//! Metrics definitions for the signal relay.
//!
//! All metrics follow Prometheus naming conventions:
//! - `relay_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded enums, never room ids or principal ids:
//! - `role`: host, viewer, admin
//! - `kind`: offer, answer, ice_candidate
//! - `channel_kind`: room, admin
//! - `reason`: authentication, authorization, bad_request, internal

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded. Bus publish latency uses
/// buckets sized for an in-datacenter Redis round trip.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("relay_bus_publish".to_string()),
            &[
                0.0005, 0.001, 0.0025, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500,
            ],
        )
        .map_err(|e| format!("Failed to set bus publish buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Connection & Room Metrics (Gauges)
// ============================================================================

/// Track an accepted WebSocket connection.
///
/// Metric: `relay_connections_active`
/// Labels: `role` (host, viewer, admin)
pub fn connection_opened(role: &'static str) {
    gauge!("relay_connections_active", "role" => role).increment(1.0);
}

/// Track a closed WebSocket connection. Pairs with [`connection_opened`].
pub fn connection_closed(role: &'static str) {
    gauge!("relay_connections_active", "role" => role).decrement(1.0);
}

/// Set the number of rooms held by this worker's registry.
///
/// Metric: `relay_rooms_active`
pub fn set_rooms_active(count: usize) {
    // usize to f64 conversion is safe for realistic room counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("relay_rooms_active").set(count as f64);
}

/// Set the number of admin event subscribers on this worker.
///
/// Metric: `relay_admin_viewers_active`
pub fn set_admin_viewers_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("relay_admin_viewers_active").set(count as f64);
}

// ============================================================================
// Message Flow (Counters)
// ============================================================================

/// Record a signaling message published to the bus.
///
/// Metric: `relay_messages_published_total`
/// Labels: `kind`
pub fn record_message_published(kind: &'static str) {
    counter!("relay_messages_published_total", "kind" => kind).increment(1);
}

/// Record local deliveries performed by the bridge.
///
/// Metric: `relay_messages_delivered_total`
/// Labels: `channel_kind` (room, admin)
pub fn record_messages_delivered(channel_kind: &'static str, count: usize) {
    counter!("relay_messages_delivered_total", "channel_kind" => channel_kind)
        .increment(count as u64);
}

/// Record a failed write to a single local connection.
///
/// Metric: `relay_delivery_failures_total`
pub fn record_delivery_failure() {
    counter!("relay_delivery_failures_total").increment(1);
}

/// Record an inbound frame dropped as malformed.
///
/// Metric: `relay_malformed_messages_total`
pub fn record_malformed_message() {
    counter!("relay_malformed_messages_total").increment(1);
}

/// Record bus publish latency.
///
/// Metric: `relay_bus_publish_duration_seconds`
pub fn record_bus_publish_duration(duration: Duration) {
    histogram!("relay_bus_publish_duration_seconds").record(duration.as_secs_f64());
}

// ============================================================================
// Security & Lifecycle Events (Counters)
// ============================================================================

/// Record a rejected connection attempt.
///
/// Metric: `relay_auth_rejections_total`
/// Labels: `reason`
pub fn record_auth_rejection(reason: &'static str) {
    counter!("relay_auth_rejections_total", "reason" => reason).increment(1);
}

/// Record a host replaced by a newer host connection.
///
/// Metric: `relay_host_takeovers_total`
pub fn record_host_takeover() {
    counter!("relay_host_takeovers_total").increment(1);
}

/// Record a bridge resubscription attempt after losing the bus.
///
/// Metric: `relay_bus_reconnects_total`
pub fn record_bus_reconnect() {
    counter!("relay_bus_reconnects_total").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    // The free functions record into whatever recorder is installed; with
    // none installed they are no-ops, which is enough to exercise them.

    #[test]
    fn test_gauges_without_recorder() {
        connection_opened("host");
        connection_closed("host");
        set_rooms_active(0);
        set_rooms_active(10_000);
        set_admin_viewers_active(3);
    }

    #[test]
    fn test_counters_without_recorder() {
        record_message_published("offer");
        record_messages_delivered("room", 2);
        record_messages_delivered("admin", 0);
        record_delivery_failure();
        record_malformed_message();
        record_auth_rejection("authorization");
        record_host_takeover();
        record_bus_reconnect();
        record_bus_publish_duration(Duration::from_micros(800));
    }

    #[test]
    fn test_counters_are_recorded_with_labels() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_message_published("answer");
            record_message_published("answer");
            record_auth_rejection("authentication");
            record_messages_delivered("room", 3);
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let counter_value = |name: &str, label: (&str, &str)| {
            snapshot.iter().find_map(|(key, _, _, value)| {
                let key = key.key();
                let labelled = key
                    .labels()
                    .any(|l| l.key() == label.0 && l.value() == label.1);
                match value {
                    DebugValue::Counter(v) if key.name() == name && labelled => Some(*v),
                    _ => None,
                }
            })
        };

        assert_eq!(
            counter_value("relay_messages_published_total", ("kind", "answer")),
            Some(2)
        );
        assert_eq!(
            counter_value("relay_auth_rejections_total", ("reason", "authentication")),
            Some(1)
        );
        assert_eq!(
            counter_value("relay_messages_delivered_total", ("channel_kind", "room")),
            Some(3)
        );
    }
}
