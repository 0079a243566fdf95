//! Test doubles for exercising pool behavior.
//!
//! [`InMemoryRecorder`] captures every [`MetricsRecorder`] callback so
//! tests can assert on counts and latency distributions without a real
//! metrics backend.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::metrics::MetricsRecorder;

/// Recorder that keeps every event in memory.
#[derive(Debug, Default)]
pub struct InMemoryRecorder {
    allocation_success: Mutex<Vec<Duration>>,
    allocation_error: Mutex<Vec<Duration>>,
    reset: Mutex<Vec<Duration>>,
    destroy: Mutex<Vec<Duration>>,
    lifetime: Mutex<Vec<Duration>>,
    idle_time: Mutex<Vec<Duration>>,
    recycled: AtomicU64,
}

impl InMemoryRecorder {
    pub fn allocation_success_count(&self) -> usize {
        self.allocation_success.lock().len()
    }

    pub fn allocation_error_count(&self) -> usize {
        self.allocation_error.lock().len()
    }

    pub fn allocation_total_count(&self) -> usize {
        self.allocation_success_count() + self.allocation_error_count()
    }

    pub fn reset_count(&self) -> usize {
        self.reset.lock().len()
    }

    pub fn destroy_count(&self) -> usize {
        self.destroy.lock().len()
    }

    pub fn recycled_count(&self) -> u64 {
        self.recycled.load(Ordering::SeqCst)
    }

    pub fn min_allocation_success(&self) -> Option<Duration> {
        self.allocation_success.lock().iter().min().copied()
    }

    pub fn min_allocation_error(&self) -> Option<Duration> {
        self.allocation_error.lock().iter().min().copied()
    }

    pub fn min_reset(&self) -> Option<Duration> {
        self.reset.lock().iter().min().copied()
    }

    pub fn max_reset(&self) -> Option<Duration> {
        self.reset.lock().iter().max().copied()
    }

    pub fn max_destroy(&self) -> Option<Duration> {
        self.destroy.lock().iter().max().copied()
    }

    pub fn min_lifetime(&self) -> Option<Duration> {
        self.lifetime.lock().iter().min().copied()
    }

    pub fn min_idle_time(&self) -> Option<Duration> {
        self.idle_time.lock().iter().min().copied()
    }

    pub fn max_idle_time(&self) -> Option<Duration> {
        self.idle_time.lock().iter().max().copied()
    }

    pub fn idle_time_count(&self) -> usize {
        self.idle_time.lock().len()
    }
}

impl MetricsRecorder for InMemoryRecorder {
    fn record_allocation_success(&self, latency: Duration) {
        self.allocation_success.lock().push(latency);
    }

    fn record_allocation_error(&self, latency: Duration) {
        self.allocation_error.lock().push(latency);
    }

    fn record_reset(&self, latency: Duration) {
        self.reset.lock().push(latency);
    }

    fn record_destroy(&self, latency: Duration) {
        self.destroy.lock().push(latency);
    }

    fn record_recycled(&self) {
        self.recycled.fetch_add(1, Ordering::SeqCst);
    }

    fn record_lifetime(&self, lifetime: Duration) {
        self.lifetime.lock().push(lifetime);
    }

    fn record_idle_time(&self, idle: Duration) {
        self.idle_time.lock().push(idle);
    }
}
