//! End-to-end acquire/release behavior: FIFO waves with eviction, LIFO
//! handoff order, and recycling without reallocation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tidepool::{Order, PoolBuilder, PooledRef};

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

fn counting_allocator(
    counter: &Arc<AtomicU64>,
) -> impl Fn() -> std::future::Ready<Result<u64, tidepool::BoxError>> + Send + Sync + 'static {
    let counter = Arc::clone(counter);
    move || std::future::ready(Ok(counter.fetch_add(1, Ordering::SeqCst) + 1))
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

// ---------------------------------------------------------------------------
// FIFO smoke: three waves of three borrowers over a pool of three
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fifo_smoke_three_waves() {
    let new_count = Arc::new(AtomicU64::new(0));
    let pool = PoolBuilder::from(counting_allocator(&new_count))
        .initial_size(2)
        .size_max(3)
        .eviction_predicate(|_value: &u64, meta| meta.acquire_count() >= 2)
        .build()
        .await
        .unwrap();

    // Wave 1 is served synchronously: two warmed resources plus one
    // fresh allocation.
    let mut wave1 = Vec::new();
    for _ in 0..3 {
        wave1.push(pool.acquire().await.unwrap());
    }
    let wave1_values: Vec<u64> = wave1.iter().map(|r| **r).collect();
    assert_eq!(wave1_values, vec![1, 2, 3]);
    assert!(wave1.iter().all(|r| r.metadata().acquire_count() == 1));

    // Waves 2 and 3 queue up behind the exhausted pool, in order.
    let mut wave2_handles = Vec::new();
    for _ in 0..3 {
        let pool = pool.clone();
        wave2_handles.push(tokio::spawn(async move { pool.acquire().await.unwrap() }));
        settle().await;
    }
    let mut wave3_handles = Vec::new();
    for _ in 0..3 {
        let pool = pool.clone();
        wave3_handles.push(tokio::spawn(async move { pool.acquire().await.unwrap() }));
        settle().await;
    }
    assert_eq!(pool.metrics().pending_acquire, 6);

    // Releasing wave 1 unblocks exactly wave 2 with the same resources.
    for pooled in wave1 {
        pooled.release().await.unwrap();
    }
    let mut wave2 = Vec::new();
    for handle in wave2_handles {
        wave2.push(handle.await.unwrap());
    }
    let mut wave2_values: Vec<u64> = wave2.iter().map(|r| **r).collect();
    wave2_values.sort_unstable();
    assert_eq!(wave2_values, vec![1, 2, 3], "wave 2 reuses wave 1 resources");
    assert!(wave2.iter().all(|r| r.metadata().acquire_count() == 2));
    assert_eq!(pool.metrics().pending_acquire, 3);

    // Releasing wave 2 evicts the used-up resources; wave 3 gets fresh
    // allocations.
    for pooled in wave2 {
        pooled.release().await.unwrap();
    }
    let mut wave3 = Vec::new();
    for handle in wave3_handles {
        wave3.push(handle.await.unwrap());
    }
    let mut wave3_values: Vec<u64> = wave3.iter().map(|r| **r).collect();
    wave3_values.sort_unstable();
    assert_eq!(wave3_values, vec![4, 5, 6], "wave 3 is all new");
    assert!(wave3.iter().all(|r| r.metadata().acquire_count() == 1));

    assert_eq!(new_count.load(Ordering::SeqCst), 6, "total allocations");
}

// ---------------------------------------------------------------------------
// LIFO: the most recent waiter wins the freed slot
// ---------------------------------------------------------------------------

#[tokio::test]
async fn lifo_single_slot_serves_second_waiter_first() {
    let new_count = Arc::new(AtomicU64::new(0));
    let pool = PoolBuilder::from(counting_allocator(&new_count))
        .size_max(1)
        .order(Order::Lifo)
        .build()
        .await
        .unwrap();

    let held = pool.acquire().await.unwrap();

    let completions: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let first_pool = pool.clone();
    let first_log = Arc::clone(&completions);
    let first = tokio::spawn(async move {
        let pooled = first_pool.acquire().await.unwrap();
        first_log.lock().push("first");
        pooled.release().await.unwrap();
    });
    settle().await;

    let second_pool = pool.clone();
    let second_log = Arc::clone(&completions);
    let second = tokio::spawn(async move {
        let pooled = second_pool.acquire().await.unwrap();
        second_log.lock().push("second");
        pooled.release().await.unwrap();
    });
    settle().await;

    held.release().await.unwrap();
    first.await.unwrap();
    second.await.unwrap();

    assert_eq!(
        *completions.lock(),
        vec!["second", "first"],
        "second in, first out"
    );
    assert_eq!(new_count.load(Ordering::SeqCst), 1, "created one");
}

#[tokio::test]
async fn lifo_pool_with_fifo_pending_override_serves_in_arrival_order() {
    let new_count = Arc::new(AtomicU64::new(0));
    let pool = PoolBuilder::from(counting_allocator(&new_count))
        .size_max(1)
        .order(Order::Lifo)
        .pending_order(Order::Fifo)
        .build()
        .await
        .unwrap();

    let held = pool.acquire().await.unwrap();

    let completions: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    for name in ["first", "second"] {
        let pool = pool.clone();
        let log = Arc::clone(&completions);
        tokio::spawn(async move {
            let pooled = pool.acquire().await.unwrap();
            log.lock().push(name);
            pooled.release().await.unwrap();
        });
        settle().await;
    }

    held.release().await.unwrap();
    settle().await;

    assert_eq!(*completions.lock(), vec!["first", "second"]);
}

// ---------------------------------------------------------------------------
// Round-trip laws
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_cycle_does_not_reallocate() {
    let new_count = Arc::new(AtomicU64::new(0));
    let pool = PoolBuilder::from(counting_allocator(&new_count))
        .size_max(3)
        .build()
        .await
        .unwrap();

    let mut refs: Vec<PooledRef<u64>> = Vec::new();
    for _ in 0..3 {
        refs.push(pool.acquire().await.unwrap());
    }
    for pooled in refs.drain(..) {
        pooled.release().await.unwrap();
    }
    for _ in 0..3 {
        refs.push(pool.acquire().await.unwrap());
    }

    assert_eq!(
        new_count.load(Ordering::SeqCst),
        3,
        "second round recycles, never allocates"
    );
}

#[tokio::test]
async fn lifo_round_trip_returns_same_resource() {
    let new_count = Arc::new(AtomicU64::new(0));
    let pool = PoolBuilder::from(counting_allocator(&new_count))
        .size_max(1)
        .order(Order::Lifo)
        .build()
        .await
        .unwrap();

    let first = pool.acquire().await.unwrap();
    let value = *first;
    first.release().await.unwrap();

    let second = pool.acquire().await.unwrap();
    assert_eq!(*second, value);
    assert_eq!(second.metadata().acquire_count(), 2);
}

#[tokio::test]
async fn with_poolable_scopes_acquire_and_release() {
    let new_count = Arc::new(AtomicU64::new(0));
    let pool = PoolBuilder::from(counting_allocator(&new_count))
        .size_max(1)
        .build()
        .await
        .unwrap();

    let doubled = pool
        .with_poolable(|value: &mut u64| Box::pin(async move { *value * 2 }))
        .await
        .unwrap();
    assert_eq!(doubled, 2);

    let metrics = pool.metrics();
    assert_eq!(metrics.idle, 1, "resource returned after the scope");
    assert_eq!(metrics.acquired, 0);
}
