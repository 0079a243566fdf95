//! Pool configuration and builder.
//!
//! [`PoolBuilder`] collects the allocator, the optional handlers, and the
//! numeric knobs, validates them eagerly, and warms the pool up to
//! `initial_size` on [`build`](PoolBuilder::build). The resulting
//! [`PoolConfig`] is immutable for the lifetime of the pool.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{BoxError, Error, Result};
use crate::metrics::{MetricsRecorder, NoopRecorder};
use crate::pool::Pool;
use crate::slot::RefMetadata;

/// Future returned by the allocator.
pub type AllocFuture<T> = Pin<Box<dyn Future<Output = std::result::Result<T, BoxError>> + Send>>;

/// Future returned by the release and destroy handlers.
pub type HandlerFuture<'a> =
    Pin<Box<dyn Future<Output = std::result::Result<(), BoxError>> + Send + 'a>>;

pub(crate) type Allocator<T> = Arc<dyn Fn() -> AllocFuture<T> + Send + Sync>;
pub(crate) type ReleaseHandler<T> =
    Arc<dyn for<'a> Fn(&'a mut T) -> HandlerFuture<'a> + Send + Sync>;
pub(crate) type DestroyHandler<T> = Arc<dyn Fn(T) -> HandlerFuture<'static> + Send + Sync>;
pub(crate) type EvictionPredicate<T> = Arc<dyn Fn(&T, &RefMetadata) -> bool + Send + Sync>;

/// Ordering policy for the idle store (and, by default, the pending
/// queue).
///
/// `Fifo` spreads load evenly across resources; `Lifo` keeps recently
/// used resources warm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Order {
    /// First in, first out.
    #[default]
    Fifo,
    /// Last in, first out.
    Lifo,
}

fn default_release<T>(_value: &mut T) -> HandlerFuture<'_> {
    Box::pin(std::future::ready(Ok(())))
}

fn default_destroy<T: Send + 'static>(value: T) -> HandlerFuture<'static> {
    Box::pin(async move {
        drop(value);
        Ok(())
    })
}

fn default_eviction<T>(_value: &T, _metadata: &RefMetadata) -> bool {
    false
}

/// Immutable pool configuration, produced by [`PoolBuilder`].
pub struct PoolConfig<T: Send + 'static> {
    pub(crate) allocator: Allocator<T>,
    pub(crate) release_handler: ReleaseHandler<T>,
    pub(crate) destroy_handler: DestroyHandler<T>,
    pub(crate) eviction: EvictionPredicate<T>,
    pub(crate) recorder: Arc<dyn MetricsRecorder>,
    pub(crate) size_max: usize,
    pub(crate) initial_size: usize,
    pub(crate) max_pending_acquire: usize,
    pub(crate) order: Order,
    pub(crate) pending_order: Order,
    pub(crate) affinity: bool,
}

impl<T: Send + 'static> PoolConfig<T> {
    /// Maximum number of live resources (`usize::MAX` when unbounded).
    #[must_use]
    pub fn size_max(&self) -> usize {
        self.size_max
    }

    /// Number of resources allocated eagerly at build time.
    #[must_use]
    pub fn initial_size(&self) -> usize {
        self.initial_size
    }

    /// Pending queue ceiling (`usize::MAX` when unbounded).
    #[must_use]
    pub fn max_pending_acquire(&self) -> usize {
        self.max_pending_acquire
    }

    /// Idle store ordering policy.
    #[must_use]
    pub fn order(&self) -> Order {
        self.order
    }

    /// Whether the idle store is partitioned per carrier thread.
    #[must_use]
    pub fn affinity(&self) -> bool {
        self.affinity
    }
}

impl<T: Send + 'static> std::fmt::Debug for PoolConfig<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolConfig")
            .field("size_max", &self.size_max)
            .field("initial_size", &self.initial_size)
            .field("max_pending_acquire", &self.max_pending_acquire)
            .field("order", &self.order)
            .field("pending_order", &self.pending_order)
            .field("affinity", &self.affinity)
            .finish()
    }
}

/// Builder for [`Pool`].
///
/// Start from [`PoolBuilder::from`] with the allocator, chain the
/// settings, then [`build`](Self::build).
pub struct PoolBuilder<T: Send + 'static> {
    allocator: Allocator<T>,
    release_handler: ReleaseHandler<T>,
    destroy_handler: DestroyHandler<T>,
    eviction: EvictionPredicate<T>,
    recorder: Arc<dyn MetricsRecorder>,
    size_max: usize,
    initial_size: usize,
    max_pending_acquire: usize,
    order: Order,
    pending_order: Option<Order>,
    affinity: bool,
}

impl<T: Send + 'static> PoolBuilder<T> {
    /// Start a builder from an asynchronous allocator.
    ///
    /// The allocator is invoked once per resource creation; its errors
    /// fail the acquire (or the build, during warm-up) that triggered
    /// the allocation.
    pub fn from<F, Fut>(allocator: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, BoxError>> + Send + 'static,
    {
        Self {
            allocator: Arc::new(move || Box::pin(allocator())),
            release_handler: Arc::new(default_release),
            destroy_handler: Arc::new(default_destroy),
            eviction: Arc::new(default_eviction),
            recorder: Arc::new(NoopRecorder),
            size_max: usize::MAX,
            initial_size: 0,
            max_pending_acquire: usize::MAX,
            order: Order::Fifo,
            pending_order: None,
            affinity: false,
        }
    }

    /// Cap the number of live resources. Must be at least 1.
    #[must_use]
    pub fn size_max(mut self, size_max: usize) -> Self {
        self.size_max = size_max;
        self
    }

    /// Remove the allocation cap.
    #[must_use]
    pub fn size_unbounded(mut self) -> Self {
        self.size_max = usize::MAX;
        self
    }

    /// Allocate `initial_size` resources eagerly during
    /// [`build`](Self::build).
    #[must_use]
    pub fn initial_size(mut self, initial_size: usize) -> Self {
        self.initial_size = initial_size;
        self
    }

    /// Cap the pending acquire queue. Zero forbids waiting entirely.
    #[must_use]
    pub fn max_pending_acquire(mut self, max_pending_acquire: usize) -> Self {
        self.max_pending_acquire = max_pending_acquire;
        self
    }

    /// Remove the pending queue cap.
    #[must_use]
    pub fn max_pending_acquire_unbounded(mut self) -> Self {
        self.max_pending_acquire = usize::MAX;
        self
    }

    /// Ordering policy for the idle store. Unless overridden with
    /// [`pending_order`](Self::pending_order), waiters are served in the
    /// same order.
    #[must_use]
    pub fn order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    /// Override the waiter ordering independently of the idle store.
    #[must_use]
    pub fn pending_order(mut self, order: Order) -> Self {
        self.pending_order = Some(order);
        self
    }

    /// Partition the idle store per carrier thread, with work-stealing
    /// fallback.
    #[must_use]
    pub fn affinity(mut self, affinity: bool) -> Self {
        self.affinity = affinity;
        self
    }

    /// Predicate deciding whether a resource should be destroyed rather
    /// than recycled. Consulted before handing out an idle resource and
    /// after each successful release handler run. Must be pure.
    #[must_use]
    pub fn eviction_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&T, &RefMetadata) -> bool + Send + Sync + 'static,
    {
        self.eviction = Arc::new(predicate);
        self
    }

    /// Asynchronous reset logic run on every release, before the
    /// eviction decision. A failure destroys the resource and surfaces
    /// to the releaser.
    #[must_use]
    pub fn release_handler<F>(mut self, handler: F) -> Self
    where
        F: for<'a> Fn(&'a mut T) -> HandlerFuture<'a> + Send + Sync + 'static,
    {
        self.release_handler = Arc::new(handler);
        self
    }

    /// Asynchronous teardown run when a resource leaves the pool for
    /// good.
    #[must_use]
    pub fn destroy_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
    {
        self.destroy_handler = Arc::new(move |value| Box::pin(handler(value)));
        self
    }

    /// Attach a metrics recorder.
    #[must_use]
    pub fn metrics_recorder(mut self, recorder: Arc<dyn MetricsRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    /// Validate the configuration, warm up `initial_size` resources, and
    /// return the pool.
    ///
    /// # Errors
    /// `Error::Configuration` on invalid settings; the allocator's error
    /// if warm-up fails (already-warmed resources are destroyed and the
    /// pool is not created).
    pub async fn build(self) -> Result<Pool<T>> {
        Pool::start(self.into_config()?).await
    }

    fn into_config(self) -> Result<PoolConfig<T>> {
        if self.size_max == 0 {
            return Err(Error::configuration("size_max must be at least 1"));
        }
        if self.initial_size > self.size_max {
            return Err(Error::configuration(format!(
                "initial_size ({}) must not exceed size_max ({})",
                self.initial_size, self.size_max
            )));
        }
        Ok(PoolConfig {
            allocator: self.allocator,
            release_handler: self.release_handler,
            destroy_handler: self.destroy_handler,
            eviction: self.eviction,
            recorder: self.recorder,
            size_max: self.size_max,
            initial_size: self.initial_size,
            max_pending_acquire: self.max_pending_acquire,
            order: self.order,
            pending_order: self.pending_order.unwrap_or(self.order),
            affinity: self.affinity,
        })
    }
}
