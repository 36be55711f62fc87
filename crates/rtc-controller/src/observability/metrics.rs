//! Metric definitions for the RTC controller.
//!
//! All metrics follow Prometheus naming conventions:
//! - `rtc_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus metrics recorder and return its handle.
///
/// Must be called before any metrics are recorded. Room entry spans a
/// network round trip so its buckets reach into whole seconds.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("rtc_room_enter".to_string()),
            &[
                0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000, 30.000,
            ],
        )
        .map_err(|e| format!("Failed to set room enter buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Session & Actor Metrics (Gauges)
// ============================================================================

/// Set the number of live sessions.
///
/// Metric: `rtc_sessions_active`
/// Labels: none
pub fn set_sessions_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("rtc_sessions_active").set(count as f64);
}

/// Set the mailbox depth for an actor type.
///
/// Metric: `rtc_actor_mailbox_depth`
/// Labels: `actor_type` (controller, session)
pub fn set_actor_mailbox_depth(actor_type: &'static str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("rtc_actor_mailbox_depth", "actor_type" => actor_type).set(depth as f64);
}

/// Record a supervisor-detected actor panic.
///
/// Metric: `rtc_actor_panics_total`
/// Labels: `actor_type`
pub fn record_actor_panic(actor_type: &'static str) {
    counter!("rtc_actor_panics_total", "actor_type" => actor_type).increment(1);
}

// ============================================================================
// Command & Event Metrics (Counters)
// ============================================================================

/// Record a processed session command.
///
/// Metric: `rtc_commands_total`
/// Labels: `command`, `outcome` (ok, validation, state, unsupported, device, internal)
pub fn record_command(command: &'static str, outcome: &'static str) {
    counter!("rtc_commands_total", "command" => command, "outcome" => outcome).increment(1);
}

/// Record a command refused by session state.
///
/// Metric: `rtc_state_conflicts_total`
/// Labels: `kind`
pub fn record_state_conflict(kind: &'static str) {
    counter!("rtc_state_conflicts_total", "kind" => kind).increment(1);
}

/// Record an event fanned out to observers.
///
/// Metric: `rtc_events_dispatched_total`
/// Labels: `event`
pub fn record_event_dispatched(event: &'static str) {
    counter!("rtc_events_dispatched_total", "event" => event).increment(1);
}

/// Record a publish task state transition.
///
/// Metric: `rtc_publish_task_transitions_total`
/// Labels: `state`
pub fn record_publish_task_transition(state: &'static str) {
    counter!("rtc_publish_task_transitions_total", "state" => state).increment(1);
}

// ============================================================================
// Latency Metrics (Histograms)
// ============================================================================

/// Record time from enter request to engine acknowledgment.
///
/// Metric: `rtc_room_enter_duration_seconds`
/// Labels: `status` (success, error)
pub fn record_room_enter(duration: Duration, success: bool) {
    let status = if success { "success" } else { "error" };
    histogram!("rtc_room_enter_duration_seconds", "status" => status)
        .record(duration.as_secs_f64());
}
