//! Metrics sink
//!
//! Every layer pushes counters into an injected [`MetricsSink`] instead of
//! reaching back into the gateway, which keeps the dependency graph a
//! straight line: gateway -> subscription -> api -> storage.

use std::sync::Arc;

/// Counter and gauge sink. Implementations must be cheap; callers fire and
/// forget on hot paths.
pub trait MetricsSink: Send + Sync {
    fn incr_counter(&self, name: &'static str, value: u64);
    fn record_gauge(&self, name: &'static str, value: f64);
}

/// Discards everything. The default when no metrics backend is wired up.
#[derive(Debug, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn incr_counter(&self, _name: &'static str, _value: u64) {}
    fn record_gauge(&self, _name: &'static str, _value: f64) {}
}

/// Shared handle to the process-wide sink.
pub type SharedMetrics = Arc<dyn MetricsSink>;

/// Create the default no-op sink.
#[must_use]
pub fn noop() -> SharedMetrics {
    Arc::new(NoopMetrics)
}
