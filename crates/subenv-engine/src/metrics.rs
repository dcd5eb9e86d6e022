//! Observability metrics for the allocation engine.
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `subenv_allocations_total` | Counter | `outcome` | Allocation requests by outcome |
//! | `subenv_allocation_duration_seconds` | Histogram | `outcome` | End-to-end allocation latency |
//! | `subenv_readiness_wait_seconds` | Histogram | `result` | Time spent waiting for a new environment |
//! | `subenv_pool_free_slots` | Gauge | - | Free slots seen at the last provisioning |
//! | `subenv_sync_total` | Counter | `result` | Per-environment reconciliation results |
//! | `subenv_deployments_total` | Counter | `result` | Deployment task submissions |
//! | `subenv_callbacks_total` | Counter | `workflow`, `status` | Webhook callbacks handled |
//! | `subenv_notifications_total` | Counter | `result` | Notifications sent |
//!
//! Metrics go through the `metrics` facade; the API binary installs the
//! Prometheus recorder.

use std::time::Duration;

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: allocation requests by outcome.
    pub const ALLOCATIONS_TOTAL: &str = "subenv_allocations_total";
    /// Histogram: allocation latency in seconds.
    pub const ALLOCATION_DURATION_SECONDS: &str = "subenv_allocation_duration_seconds";
    /// Histogram: readiness wait in seconds.
    pub const READINESS_WAIT_SECONDS: &str = "subenv_readiness_wait_seconds";
    /// Gauge: free slots at the last provisioning.
    pub const POOL_FREE_SLOTS: &str = "subenv_pool_free_slots";
    /// Counter: reconciliation results.
    pub const SYNC_TOTAL: &str = "subenv_sync_total";
    /// Counter: deployment submissions.
    pub const DEPLOYMENTS_TOTAL: &str = "subenv_deployments_total";
    /// Counter: webhook callbacks.
    pub const CALLBACKS_TOTAL: &str = "subenv_callbacks_total";
    /// Counter: notifications.
    pub const NOTIFICATIONS_TOTAL: &str = "subenv_notifications_total";
}

/// Label keys used across metrics.
pub mod labels {
    /// Allocation outcome (skipped, reused, provisioned, error).
    pub const OUTCOME: &str = "outcome";
    /// Result status (success, failure, timeout).
    pub const RESULT: &str = "result";
    /// Workflow kind of a callback.
    pub const WORKFLOW: &str = "workflow";
    /// Coarse callback status.
    pub const STATUS: &str = "status";
}

/// High-level interface for recording engine metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineMetrics;

impl EngineMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Records one finished allocation.
    pub fn record_allocation(&self, outcome: &'static str, duration: Duration) {
        counter!(names::ALLOCATIONS_TOTAL, labels::OUTCOME => outcome).increment(1);
        histogram!(names::ALLOCATION_DURATION_SECONDS, labels::OUTCOME => outcome)
            .record(duration.as_secs_f64());
    }

    /// Records a readiness wait.
    pub fn observe_readiness_wait(&self, result: &'static str, duration: Duration) {
        histogram!(names::READINESS_WAIT_SECONDS, labels::RESULT => result)
            .record(duration.as_secs_f64());
    }

    /// Sets the free slot gauge.
    #[allow(clippy::cast_precision_loss)] // pool sizes are small
    pub fn set_free_slots(&self, free: usize) {
        gauge!(names::POOL_FREE_SLOTS).set(free as f64);
    }

    /// Records a per-environment reconciliation result.
    pub fn record_sync(&self, result: &'static str) {
        counter!(names::SYNC_TOTAL, labels::RESULT => result).increment(1);
    }

    /// Records a deployment submission.
    pub fn record_deployment(&self, result: &'static str) {
        counter!(names::DEPLOYMENTS_TOTAL, labels::RESULT => result).increment(1);
    }

    /// Records a handled callback.
    pub fn record_callback(&self, workflow: &'static str, status: &str) {
        counter!(
            names::CALLBACKS_TOTAL,
            labels::WORKFLOW => workflow,
            labels::STATUS => status.to_string(),
        )
        .increment(1);
    }

    /// Records a notification attempt.
    pub fn record_notification(&self, result: &'static str) {
        counter!(names::NOTIFICATIONS_TOTAL, labels::RESULT => result).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_metrics_record_without_recorder() {
        let metrics = EngineMetrics::new();
        metrics.record_allocation("reused", Duration::from_millis(10));
        metrics.record_callback("sub_environment", "passed");
        metrics.set_free_slots(3);
    }
}
