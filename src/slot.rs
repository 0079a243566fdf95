//! Pooled reference handle and per-resource lifecycle state.
//!
//! A [`PooledRef`] owns the resource for the duration of one borrow and
//! carries the slot's metadata. Dropping an undischarged handle returns
//! the resource to the pool from a spawned task; [`release`](PooledRef::release)
//! and [`invalidate`](PooledRef::invalidate) do the same inline and
//! surface handler errors.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::Result;
use crate::pool::PoolCore;

const PHASE_IDLE: u8 = 0;
const PHASE_ACQUIRED: u8 = 1;
const PHASE_DESTROYED: u8 = 2;

/// Lifecycle state shared between a pooled resource's handle and the
/// pool's bookkeeping.
///
/// The phase machine is IDLE <-> ACQUIRED -> DESTROYED; the transition
/// to DESTROYED happens at most once, guarded by a swap.
pub(crate) struct SlotState {
    allocated_at: Instant,
    acquire_count: AtomicU64,
    last_release: Mutex<Option<Instant>>,
    phase: AtomicU8,
}

impl SlotState {
    /// New slot entering the idle store (warm-up path).
    pub(crate) fn new_idle() -> Arc<Self> {
        Arc::new(Self {
            allocated_at: Instant::now(),
            acquire_count: AtomicU64::new(0),
            last_release: Mutex::new(None),
            phase: AtomicU8::new(PHASE_IDLE),
        })
    }

    /// New slot handed straight to a borrower (allocation path).
    pub(crate) fn new_acquired() -> Arc<Self> {
        Arc::new(Self {
            allocated_at: Instant::now(),
            acquire_count: AtomicU64::new(1),
            last_release: Mutex::new(None),
            phase: AtomicU8::new(PHASE_ACQUIRED),
        })
    }

    pub(crate) fn mark_acquired(&self) {
        self.acquire_count.fetch_add(1, Ordering::AcqRel);
        self.phase.store(PHASE_ACQUIRED, Ordering::Release);
    }

    /// Undo a `mark_acquired` whose grant never reached a borrower.
    pub(crate) fn revert_acquired(&self) {
        self.acquire_count.fetch_sub(1, Ordering::AcqRel);
        self.phase.store(PHASE_IDLE, Ordering::Release);
    }

    pub(crate) fn mark_idle(&self) {
        *self.last_release.lock() = Some(Instant::now());
        self.phase.store(PHASE_IDLE, Ordering::Release);
    }

    /// Claim the single permitted transition to DESTROYED. Returns false
    /// if the slot was already destroyed.
    pub(crate) fn mark_destroyed(&self) -> bool {
        self.phase.swap(PHASE_DESTROYED, Ordering::AcqRel) != PHASE_DESTROYED
    }

    pub(crate) fn age(&self) -> Duration {
        self.allocated_at.elapsed()
    }

    /// Time since the last release, or since allocation for a resource
    /// that has never been released.
    pub(crate) fn idle_duration(&self) -> Duration {
        match *self.last_release.lock() {
            Some(released_at) => released_at.elapsed(),
            None => self.allocated_at.elapsed(),
        }
    }

    pub(crate) fn metadata(&self) -> RefMetadata {
        RefMetadata {
            acquire_count: self.acquire_count.load(Ordering::Acquire),
            age: self.age(),
            idle_duration: self.idle_duration(),
        }
    }
}

/// Read-only per-resource metadata, handed to the eviction predicate and
/// available on [`PooledRef::metadata`].
#[derive(Debug, Clone, Copy)]
pub struct RefMetadata {
    acquire_count: u64,
    age: Duration,
    idle_duration: Duration,
}

impl RefMetadata {
    /// How many times this resource has been acquired.
    #[must_use]
    pub fn acquire_count(&self) -> u64 {
        self.acquire_count
    }

    /// Time since the resource was allocated.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.age
    }

    /// Time since the resource was last released (since allocation if it
    /// has never been released).
    #[must_use]
    pub fn idle_duration(&self) -> Duration {
        self.idle_duration
    }
}

/// Handle to a borrowed resource.
///
/// Dereferences to the resource. Discharge it explicitly with
/// [`release`](Self::release) or [`invalidate`](Self::invalidate);
/// dropping the handle releases it from a spawned task instead.
pub struct PooledRef<T: Send + 'static> {
    value: Option<T>,
    slot: Arc<SlotState>,
    pool: Arc<PoolCore<T>>,
}

impl<T: Send + 'static> PooledRef<T> {
    pub(crate) fn new(value: T, slot: Arc<SlotState>, pool: Arc<PoolCore<T>>) -> Self {
        Self {
            value: Some(value),
            slot,
            pool,
        }
    }

    /// Metadata for this resource (acquire count, age, idle time).
    #[must_use]
    pub fn metadata(&self) -> RefMetadata {
        self.slot.metadata()
    }

    /// Return the resource to the pool.
    ///
    /// Runs the release handler, then either recycles the resource (to a
    /// waiting borrower or the idle store) or destroys it per the
    /// eviction predicate.
    ///
    /// # Errors
    /// `Error::ReleaseHandler` if the release handler failed; the
    /// resource is destroyed in that case.
    pub async fn release(mut self) -> Result<()> {
        match self.value.take() {
            Some(value) => {
                let slot = Arc::clone(&self.slot);
                let pool = Arc::clone(&self.pool);
                drop(self);
                crate::pool::release_value(&pool, value, slot).await
            }
            None => Ok(()),
        }
    }

    /// Destroy the resource unconditionally, without running the release
    /// handler.
    ///
    /// # Errors
    /// `Error::DestroyHandler` if the destroy handler failed.
    pub async fn invalidate(mut self) -> Result<()> {
        match self.value.take() {
            Some(value) => {
                let slot = Arc::clone(&self.slot);
                let pool = Arc::clone(&self.pool);
                drop(self);
                crate::pool::invalidate_value(&pool, value, slot).await
            }
            None => Ok(()),
        }
    }

    pub(crate) fn into_parts(mut self) -> Option<(T, Arc<SlotState>)> {
        self.value
            .take()
            .map(|value| (value, Arc::clone(&self.slot)))
    }
}

impl<T: Send + 'static> Deref for PooledRef<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value.as_ref().expect("ref used after discharge")
    }
}

impl<T: Send + 'static> DerefMut for PooledRef<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("ref used after discharge")
    }
}

impl<T: Send + 'static> Drop for PooledRef<T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            let slot = Arc::clone(&self.slot);
            let pool = Arc::clone(&self.pool);
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = crate::pool::release_value(&pool, value, slot).await;
                });
            }
        }
    }
}

impl<T: Send + std::fmt::Debug + 'static> std::fmt::Debug for PooledRef<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledRef")
            .field("value", &self.value)
            .field("acquire_count", &self.slot.metadata().acquire_count())
            .finish()
    }
}
