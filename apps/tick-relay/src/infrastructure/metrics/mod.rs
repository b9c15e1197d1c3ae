//! Prometheus Metrics Module
//!
//! Exposes relay metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Upstream**: frames and ticks received, upstream errors, reconnects
//! - **Aggregation**: average computations and persistence failures
//! - **Delivery**: updates emitted, throttled and dropped; active subscribers
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the HTTP port. Recording functions
//! are no-ops until a recorder is installed, so tests never need one.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed.
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
    // Upstream
    describe_counter!(
        "tick_relay_frames_received_total",
        "Total text frames received from the upstream stream"
    );
    describe_counter!(
        "tick_relay_ticks_received_total",
        "Total decoded ticks by outcome (applied or ignored)"
    );
    describe_counter!(
        "tick_relay_upstream_errors_total",
        "Total upstream errors by type"
    );
    describe_counter!(
        "tick_relay_reconnects_total",
        "Total upstream reconnection attempts"
    );
    describe_gauge!(
        "tick_relay_upstream_connected",
        "1 when the upstream session is open, 0 otherwise"
    );

    // Aggregation
    describe_counter!(
        "tick_relay_average_cycles_total",
        "Total average computation cycles"
    );
    describe_counter!(
        "tick_relay_persistence_failures_total",
        "Total failed saves of the average mapping"
    );
    describe_histogram!(
        "tick_relay_average_cycle_seconds",
        "Time to collapse windows and persist averages"
    );

    // Delivery
    describe_counter!(
        "tick_relay_updates_emitted_total",
        "Total live updates admitted by the throttle"
    );
    describe_counter!(
        "tick_relay_updates_throttled_total",
        "Total live updates suppressed by the throttle"
    );
    describe_counter!(
        "tick_relay_updates_dropped_total",
        "Total queued updates dropped for slow subscribers"
    );
    describe_gauge!(
        "tick_relay_subscribers",
        "Number of active subscribers"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome of applying a decoded tick.
#[derive(Debug, Clone, Copy)]
pub enum TickOutcome {
    /// Applied to a tracked symbol.
    Applied,
    /// Ignored (untracked symbol).
    Ignored,
}

impl TickOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Ignored => "ignored",
        }
    }
}

/// Record an upstream text frame.
pub fn record_frame_received() {
    counter!("tick_relay_frames_received_total").increment(1);
}

/// Record a decoded tick.
pub fn record_tick(outcome: TickOutcome) {
    counter!(
        "tick_relay_ticks_received_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record an upstream error.
pub fn record_upstream_error(error_type: &'static str) {
    counter!(
        "tick_relay_upstream_errors_total",
        "error_type" => error_type
    )
    .increment(1);
}

/// Record an upstream reconnection attempt.
pub fn record_reconnect() {
    counter!("tick_relay_reconnects_total").increment(1);
}

/// Update the upstream connection gauge.
pub fn set_upstream_connected(connected: bool) {
    gauge!("tick_relay_upstream_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Record one average computation cycle.
pub fn record_average_cycle(duration: Duration) {
    counter!("tick_relay_average_cycles_total").increment(1);
    histogram!("tick_relay_average_cycle_seconds").record(duration.as_secs_f64());
}

/// Record a failed save.
pub fn record_persistence_failure() {
    counter!("tick_relay_persistence_failures_total").increment(1);
}

/// Record an update admitted by the throttle.
pub fn record_update_emitted() {
    counter!("tick_relay_updates_emitted_total").increment(1);
}

/// Record an update suppressed by the throttle.
pub fn record_update_throttled() {
    counter!("tick_relay_updates_throttled_total").increment(1);
}

/// Record updates dropped from a slow subscriber's queue.
pub fn record_updates_dropped(count: u64) {
    counter!("tick_relay_updates_dropped_total").increment(count);
}

/// Update the active subscriber gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscribers(count: usize) {
    gauge!("tick_relay_subscribers").set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_outcome_as_str() {
        assert_eq!(TickOutcome::Applied.as_str(), "applied");
        assert_eq!(TickOutcome::Ignored.as_str(), "ignored");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_frame_received();
        record_tick(TickOutcome::Applied);
        record_updates_dropped(3);
        set_subscribers(2);
    }
}
