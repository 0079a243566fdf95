//! Metrics observation points.
//!
//! The pool reports lifecycle events to a [`MetricsRecorder`] supplied at
//! build time and exposes instantaneous gauges through
//! [`Pool::metrics`](crate::Pool::metrics).

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Passive sink for pool lifecycle events.
///
/// Every method has a no-op default so recorders only implement the
/// events they care about. Latencies are wall-clock durations of the
/// corresponding user handler; `record_lifetime` and `record_idle_time`
/// measure resource age and time spent idle respectively.
pub trait MetricsRecorder: Send + Sync + 'static {
    /// A run of the allocator completed successfully.
    fn record_allocation_success(&self, _latency: Duration) {}

    /// A run of the allocator failed.
    fn record_allocation_error(&self, _latency: Duration) {}

    /// The release handler ran (successfully or not).
    fn record_reset(&self, _latency: Duration) {}

    /// The destroy handler completed.
    fn record_destroy(&self, _latency: Duration) {}

    /// A released resource was kept for reuse instead of destroyed.
    fn record_recycled(&self) {}

    /// A resource reached the end of its life; `lifetime` is the time
    /// since allocation.
    fn record_lifetime(&self, _lifetime: Duration) {}

    /// A resource was taken from the idle store after spending
    /// `idle` waiting.
    fn record_idle_time(&self, _idle: Duration) {}
}

/// Recorder that discards every event. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRecorder;

impl MetricsRecorder for NoopRecorder {}

/// Instantaneous pool gauges.
///
/// `acquired` counts resources currently held by borrowers, including
/// allocations in flight that have already reserved a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PoolMetrics {
    /// Resources currently allocated (idle + acquired).
    pub allocated: usize,
    /// Resources sitting in the idle store.
    pub idle: usize,
    /// Resources held by borrowers.
    pub acquired: usize,
    /// Borrowers waiting in the pending queue.
    pub pending_acquire: usize,
    /// Configured allocation ceiling (`usize::MAX` when unbounded).
    pub max_allocated: usize,
    /// Configured pending queue ceiling (`usize::MAX` when unbounded).
    pub max_pending_acquire: usize,
}

/// Recorder forwarding events to the `metrics` crate facade.
///
/// Counters are emitted under `tidepool.*`; handler latencies become
/// histograms.
#[cfg(feature = "metrics")]
#[derive(Debug, Clone, Copy, Default)]
pub struct TelemetryRecorder;

#[cfg(feature = "metrics")]
impl MetricsRecorder for TelemetryRecorder {
    fn record_allocation_success(&self, latency: Duration) {
        metrics::counter!("tidepool.allocation.success.total").increment(1);
        metrics::histogram!("tidepool.allocation.success.duration").record(latency.as_secs_f64());
    }

    fn record_allocation_error(&self, latency: Duration) {
        metrics::counter!("tidepool.allocation.error.total").increment(1);
        metrics::histogram!("tidepool.allocation.error.duration").record(latency.as_secs_f64());
    }

    fn record_reset(&self, latency: Duration) {
        metrics::histogram!("tidepool.reset.duration").record(latency.as_secs_f64());
    }

    fn record_destroy(&self, latency: Duration) {
        metrics::counter!("tidepool.destroy.total").increment(1);
        metrics::histogram!("tidepool.destroy.duration").record(latency.as_secs_f64());
    }

    fn record_recycled(&self) {
        metrics::counter!("tidepool.recycled.total").increment(1);
    }

    fn record_lifetime(&self, lifetime: Duration) {
        metrics::histogram!("tidepool.lifetime").record(lifetime.as_secs_f64());
    }

    fn record_idle_time(&self, idle: Duration) {
        metrics::histogram!("tidepool.idle_time").record(idle.as_secs_f64());
    }
}
