//! Pool facade and acquire/release orchestration.
//!
//! All shared mutable state (idle store, pending queue, disposed flag)
//! lives behind one `parking_lot::Mutex`; the allocated and pending
//! counters are atomics so gauges read without the lock. User handlers
//! (allocator, release, destroy, eviction) always run outside the lock.
//!
//! Allocations run in spawned tasks and report back over oneshot
//! channels, so cancelling a borrower never aborts an allocator run: a
//! grant that finds its borrower gone is rerouted through the normal
//! release path.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::idle::{IdleEntry, IdleStore};
use crate::metrics::PoolMetrics;
use crate::pending::{GrantReceiver, GrantSender, PendingQueue, Waiter};
use crate::slot::{PooledRef, SlotState};

/// Shared pool internals.
pub(crate) struct PoolCore<T: Send + 'static> {
    pub(crate) config: PoolConfig<T>,
    state: Mutex<PoolState<T>>,
    allocated: AtomicUsize,
    pending_count: AtomicUsize,
    disposed: AtomicBool,
    next_waiter_id: AtomicU64,
}

/// State guarded by the pool lock.
struct PoolState<T: Send + 'static> {
    idle: IdleStore<T>,
    pending: PendingQueue<T>,
    disposed: bool,
}

impl<T: Send + 'static> PoolCore<T> {
    /// Reserve one allocation slot if the pool is below `size_max`.
    fn try_reserve(&self) -> bool {
        self.allocated
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |allocated| {
                (allocated < self.config.size_max).then_some(allocated + 1)
            })
            .is_ok()
    }

    fn free_slot(&self) {
        self.allocated.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

/// Asynchronous object pool.
///
/// Cheap to clone; all clones share the same state. Build one with
/// [`PoolBuilder`](crate::PoolBuilder).
pub struct Pool<T: Send + 'static> {
    inner: Arc<PoolCore<T>>,
}

impl<T: Send + 'static> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> std::fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("metrics", &self.metrics())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Outcome of one pass through the acquire critical section.
enum Decision<T: Send + 'static> {
    Granted(IdleEntry<T>),
    Allocate,
    Wait {
        id: u64,
        rx: GrantReceiver<T>,
        enqueued_at: Instant,
    },
}

impl<T: Send + 'static> Pool<T> {
    /// Validate the config and warm up `initial_size` resources.
    pub(crate) async fn start(config: PoolConfig<T>) -> Result<Self> {
        let initial_size = config.initial_size;
        let inner = Arc::new(PoolCore {
            state: Mutex::new(PoolState {
                idle: IdleStore::new(config.affinity),
                pending: PendingQueue::new(),
                disposed: false,
            }),
            allocated: AtomicUsize::new(0),
            pending_count: AtomicUsize::new(0),
            disposed: AtomicBool::new(false),
            next_waiter_id: AtomicU64::new(0),
            config,
        });
        let pool = Self { inner };

        for _ in 0..initial_size {
            if !pool.inner.try_reserve() {
                break;
            }
            match allocate_warm(&pool.inner).await {
                Ok(entry) => pool.inner.state.lock().idle.push(entry),
                Err(err) => {
                    pool.dispose().await;
                    return Err(err);
                }
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            size_max = pool.inner.config.size_max,
            initial_size,
            "created pool"
        );

        Ok(pool)
    }

    /// Borrow a resource, waiting indefinitely if none is available and
    /// the pool is at capacity.
    ///
    /// # Errors
    /// `PoolShutDown` after [`dispose`](Self::dispose); `QueueFull` when
    /// the pending queue is at `max_pending_acquire`; the allocator's
    /// error when this call triggered an allocation that failed.
    pub async fn acquire(&self) -> Result<PooledRef<T>> {
        self.acquire_inner(None).await
    }

    /// Borrow a resource, failing with `AcquireTimeout` if the request
    /// is still pending after `timeout`.
    ///
    /// The timer is armed only when the request actually enters the
    /// pending queue: a synchronous grant never times out, and neither
    /// does a borrower that owns an in-flight allocation, however slow
    /// the allocator is.
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<PooledRef<T>> {
        self.acquire_inner(Some(timeout)).await
    }

    async fn acquire_inner(&self, timeout: Option<Duration>) -> Result<PooledRef<T>> {
        let inner = &self.inner;
        loop {
            let decision = {
                let mut state = inner.state.lock();
                if state.disposed {
                    return Err(Error::PoolShutDown);
                }
                if let Some(entry) = state.idle.pop(inner.config.order) {
                    Decision::Granted(entry)
                } else if inner.try_reserve() {
                    Decision::Allocate
                } else {
                    let max = inner.config.max_pending_acquire;
                    if state.pending.len() >= max {
                        return Err(Error::QueueFull { max });
                    }
                    let (tx, rx) = oneshot::channel();
                    let id = inner.next_waiter_id.fetch_add(1, Ordering::Relaxed);
                    state.pending.push(Waiter { id, tx });
                    inner.pending_count.fetch_add(1, Ordering::AcqRel);
                    Decision::Wait {
                        id,
                        rx,
                        enqueued_at: Instant::now(),
                    }
                }
            };

            match decision {
                Decision::Granted(entry) => {
                    let meta = entry.slot.metadata();
                    if (inner.config.eviction)(&entry.value, &meta) {
                        if let Some(destroy) = begin_destroy(inner, entry.value, entry.slot) {
                            spawn_detached(destroy);
                        }
                        continue;
                    }
                    inner.config.recorder.record_idle_time(meta.idle_duration());
                    entry.slot.mark_acquired();
                    return Ok(PooledRef::new(entry.value, entry.slot, Arc::clone(inner)));
                }
                Decision::Allocate => {
                    let (tx, rx) = oneshot::channel();
                    spawn_allocation(Arc::clone(inner), tx);
                    // This borrower owns the in-flight allocation; it is
                    // not pending, so no timer runs.
                    return match rx.await {
                        Ok(outcome) => outcome,
                        Err(_) => Err(Error::PoolShutDown),
                    };
                }
                Decision::Wait {
                    id,
                    rx,
                    enqueued_at,
                } => {
                    return await_pending(inner, id, rx, enqueued_at, timeout).await;
                }
            }
        }
    }

    /// Borrow a resource, run `f` on it, and release it on every
    /// termination path — including cancellation of the returned future.
    ///
    /// A release handler failure after `f` completes is logged, not
    /// surfaced; the resource is destroyed per the release contract.
    ///
    /// # Errors
    /// The same errors as [`acquire`](Self::acquire).
    pub async fn with_poolable<U, F>(&self, f: F) -> Result<U>
    where
        F: for<'a> FnOnce(&'a mut T) -> Pin<Box<dyn Future<Output = U> + Send + 'a>>,
    {
        let mut pooled = self.acquire().await?;
        let output = f(&mut pooled).await;
        match pooled.release().await {
            Ok(()) => {}
            Err(_release_err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %_release_err, "release failed after scoped use");
            }
        }
        Ok(output)
    }

    /// Shut the pool down.
    ///
    /// Fails every pending borrower with `PoolShutDown` and destroys all
    /// idle resources, suspending until their destroy handlers complete.
    /// Resources currently held by borrowers stay usable; they are
    /// destroyed instead of recycled when released. Idempotent.
    pub async fn dispose(&self) {
        let (waiters, idle_entries) = {
            let mut state = self.inner.state.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            self.inner.disposed.store(true, Ordering::SeqCst);
            let waiters = state.pending.drain();
            self.inner.pending_count.store(0, Ordering::SeqCst);
            (waiters, state.idle.drain())
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(
            failed_waiters = waiters.len(),
            idle = idle_entries.len(),
            "disposing pool"
        );

        for waiter in waiters {
            let _ = waiter.tx.send(Err(Error::PoolShutDown));
        }

        for entry in idle_entries {
            if let Some(destroy) = begin_destroy(&self.inner, entry.value, entry.slot) {
                if let Err(_destroy_err) = destroy.await {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        error = %_destroy_err,
                        "failed to tear down idle resource during dispose"
                    );
                }
            }
        }
    }

    /// Whether [`dispose`](Self::dispose) has run.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Instantaneous gauges. Side-effect free.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let idle = self.inner.state.lock().idle.len();
        let allocated = self.inner.allocated.load(Ordering::Acquire);
        PoolMetrics {
            allocated,
            idle,
            acquired: allocated.saturating_sub(idle),
            pending_acquire: self.inner.pending_count.load(Ordering::Acquire),
            max_allocated: self.inner.config.size_max,
            max_pending_acquire: self.inner.config.max_pending_acquire,
        }
    }
}

/// Remove a waiter from the pending queue. Returns false when the
/// waiter was already taken out for a grant or an allocation promotion.
fn remove_waiter<T: Send + 'static>(inner: &Arc<PoolCore<T>>, id: u64) -> bool {
    let mut state = inner.state.lock();
    if state.pending.remove(id) {
        inner.pending_count.fetch_sub(1, Ordering::AcqRel);
        true
    } else {
        false
    }
}

/// Queue-membership guard for a suspended borrower: dropping the acquire
/// future while still enqueued removes the waiter and decrements the
/// pending count, with no other side effect.
struct WaiterGuard<'a, T: Send + 'static> {
    inner: &'a Arc<PoolCore<T>>,
    id: u64,
    armed: bool,
}

impl<T: Send + 'static> Drop for WaiterGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            remove_waiter(self.inner, self.id);
        }
    }
}

async fn await_pending<T: Send + 'static>(
    inner: &Arc<PoolCore<T>>,
    id: u64,
    mut rx: GrantReceiver<T>,
    enqueued_at: Instant,
    timeout: Option<Duration>,
) -> Result<PooledRef<T>> {
    let mut guard = WaiterGuard {
        inner,
        id,
        armed: true,
    };

    let deadline = timeout.and_then(|limit| enqueued_at.checked_add(limit).map(|at| (limit, at)));
    let received = match deadline {
        None => rx.await,
        Some((limit, at)) => {
            match tokio::time::timeout_at(tokio::time::Instant::from_std(at), &mut rx).await {
                Ok(received) => received,
                Err(_elapsed) => {
                    if remove_waiter(inner, id) {
                        guard.armed = false;
                        return Err(Error::AcquireTimeout { timeout: limit });
                    }
                    // Already matched, or promoted to own an in-flight
                    // allocation; either way no longer pending.
                    rx.await
                }
            }
        }
    };
    guard.armed = false;

    match received {
        Ok(outcome) => outcome,
        Err(_) => Err(Error::PoolShutDown),
    }
}

/// Run the allocator in a spawned task, routing the outcome to `tx`.
///
/// The reserved slot is already counted in `allocated`. If the borrower
/// vanished by the time the allocation completes, the fresh resource is
/// released back to the pool; the allocation itself is never aborted.
fn spawn_allocation<T: Send + 'static>(inner: Arc<PoolCore<T>>, tx: GrantSender<T>) {
    tokio::spawn(async move {
        let started = Instant::now();
        match (inner.config.allocator)().await {
            Ok(value) => {
                inner
                    .config
                    .recorder
                    .record_allocation_success(started.elapsed());
                let pooled = PooledRef::new(value, SlotState::new_acquired(), Arc::clone(&inner));
                if let Err(Ok(pooled)) = tx.send(Ok(pooled)) {
                    if let Some((value, slot)) = pooled.into_parts() {
                        let _ = release_value(&inner, value, slot).await;
                    }
                }
            }
            Err(source) => {
                inner
                    .config
                    .recorder
                    .record_allocation_error(started.elapsed());
                inner.free_slot();
                let _ = tx.send(Err(Error::Allocator { source }));
                replenish_pending(&inner);
            }
        }
    });
}

/// Warm-up allocation: runs inline and lands in the idle store.
async fn allocate_warm<T: Send + 'static>(inner: &Arc<PoolCore<T>>) -> Result<IdleEntry<T>> {
    let started = Instant::now();
    match (inner.config.allocator)().await {
        Ok(value) => {
            inner
                .config
                .recorder
                .record_allocation_success(started.elapsed());
            Ok(IdleEntry {
                value,
                slot: SlotState::new_idle(),
            })
        }
        Err(source) => {
            inner
                .config
                .recorder
                .record_allocation_error(started.elapsed());
            inner.free_slot();
            Err(Error::Allocator { source })
        }
    }
}

/// Return a borrowed resource to the pool: run the release handler, then
/// recycle or destroy per the eviction predicate and pool state.
pub(crate) async fn release_value<T: Send + 'static>(
    inner: &Arc<PoolCore<T>>,
    mut value: T,
    slot: Arc<SlotState>,
) -> Result<()> {
    // A disposed pool destroys outright, without running the reset.
    if inner.is_disposed() {
        if let Some(destroy) = begin_destroy(inner, value, slot) {
            spawn_detached(destroy);
        }
        return Ok(());
    }

    let started = Instant::now();
    let reset = (inner.config.release_handler)(&mut value).await;
    inner.config.recorder.record_reset(started.elapsed());

    match reset {
        Err(source) => {
            // Reset failure invalidates the resource; the failure still
            // surfaces to the releaser.
            if let Some(destroy) = begin_destroy(inner, value, slot) {
                spawn_detached(destroy);
            }
            replenish_pending(inner);
            Err(Error::ReleaseHandler { source })
        }
        Ok(()) => {
            let meta = slot.metadata();
            if (inner.config.eviction)(&value, &meta) || inner.is_disposed() {
                if let Some(destroy) = begin_destroy(inner, value, slot) {
                    spawn_detached(destroy);
                }
                replenish_pending(inner);
            } else {
                inner.config.recorder.record_recycled();
                hand_off_or_park(inner, value, slot);
            }
            Ok(())
        }
    }
}

/// Destroy unconditionally (no release handler), then re-drive the
/// pending queue with the freed capacity. Destroy handler errors
/// surface to the caller.
pub(crate) async fn invalidate_value<T: Send + 'static>(
    inner: &Arc<PoolCore<T>>,
    value: T,
    slot: Arc<SlotState>,
) -> Result<()> {
    let outcome = match begin_destroy(inner, value, slot) {
        Some(destroy) => destroy.await,
        None => Ok(()),
    };
    replenish_pending(inner);
    outcome
}

/// Hand a recycled resource to a waiter, or park it in the idle store.
///
/// A waiter that vanished between being popped and the send is skipped:
/// the grant is rolled back and offered to the next waiter.
fn hand_off_or_park<T: Send + 'static>(inner: &Arc<PoolCore<T>>, value: T, slot: Arc<SlotState>) {
    slot.mark_idle();
    let mut entry = IdleEntry { value, slot };
    loop {
        let waiter = {
            let mut state = inner.state.lock();
            if state.disposed {
                drop(state);
                // Lost the race with dispose(): its idle drain already ran.
                if let Some(destroy) = begin_destroy(inner, entry.value, entry.slot) {
                    spawn_detached(destroy);
                }
                return;
            }
            match state.pending.pop(inner.config.pending_order) {
                Some(waiter) => {
                    inner.pending_count.fetch_sub(1, Ordering::AcqRel);
                    waiter
                }
                None => {
                    state.idle.push(entry);
                    return;
                }
            }
        };

        let IdleEntry { value, slot } = entry;
        slot.mark_acquired();
        let pooled = PooledRef::new(value, Arc::clone(&slot), Arc::clone(inner));
        match waiter.tx.send(Ok(pooled)) {
            Ok(()) => return,
            Err(rejected) => {
                if let Ok(pooled) = rejected {
                    if let Some((value, slot)) = pooled.into_parts() {
                        slot.revert_acquired();
                        entry = IdleEntry { value, slot };
                        continue;
                    }
                }
                return;
            }
        }
    }
}

/// Claim the slot's destroy transition, free its capacity, and produce
/// the future that runs the destroy handler. Returns `None` when the
/// slot was already destroyed.
///
/// Capacity is freed at the decision point so waiters can be promoted
/// immediately; the handler itself may run detached (release paths) or
/// awaited (`invalidate`, `dispose`).
fn begin_destroy<T: Send + 'static>(
    inner: &Arc<PoolCore<T>>,
    value: T,
    slot: Arc<SlotState>,
) -> Option<impl Future<Output = Result<()>>> {
    if !slot.mark_destroyed() {
        return None;
    }
    inner.free_slot();
    inner.config.recorder.record_lifetime(slot.age());

    let inner = Arc::clone(inner);
    Some(async move {
        let started = Instant::now();
        let outcome = (inner.config.destroy_handler)(value).await;
        inner.config.recorder.record_destroy(started.elapsed());
        match outcome {
            Ok(()) => Ok(()),
            Err(source) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %source, "destroy handler failed");
                Err(Error::DestroyHandler { source })
            }
        }
    })
}

fn spawn_detached<F>(destroy: F)
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let _ = destroy.await;
    });
}

/// Promote waiters into fresh allocations while capacity is available.
///
/// Called whenever capacity frees up outside the recycle path (eviction,
/// invalidation, release handler failure, allocation failure). Each
/// promoted waiter owns its allocation and is no longer pending.
fn replenish_pending<T: Send + 'static>(inner: &Arc<PoolCore<T>>) {
    loop {
        let waiter = {
            let mut state = inner.state.lock();
            if state.disposed || state.pending.is_empty() {
                return;
            }
            if !inner.try_reserve() {
                return;
            }
            match state.pending.pop(inner.config.pending_order) {
                Some(waiter) => {
                    inner.pending_count.fetch_sub(1, Ordering::AcqRel);
                    waiter
                }
                None => {
                    inner.free_slot();
                    return;
                }
            }
        };
        spawn_allocation(Arc::clone(inner), waiter.tx);
    }
}
