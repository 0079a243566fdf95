//! Pending queue behavior: capacity enforcement, waiter ordering, and
//! promotion into fresh allocations when capacity frees up.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tidepool::{Error, PoolBuilder};

fn counting_allocator(
    counter: &Arc<AtomicU64>,
) -> impl Fn() -> std::future::Ready<Result<u64, tidepool::BoxError>> + Send + Sync + 'static {
    let counter = Arc::clone(counter);
    move || std::future::ready(Ok(counter.fetch_add(1, Ordering::SeqCst) + 1))
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn pending_limit_rejects_exactly_the_overflow() {
    let new_count = Arc::new(AtomicU64::new(0));
    let pool = PoolBuilder::from(counting_allocator(&new_count))
        .size_max(1)
        .initial_size(1)
        .max_pending_acquire(1)
        .build()
        .await
        .unwrap();

    let held = pool.acquire().await.unwrap();

    // First extra borrower fits in the queue.
    let waiting_pool = pool.clone();
    let waiting = tokio::spawn(async move { waiting_pool.acquire().await });
    settle().await;
    assert_eq!(pool.metrics().pending_acquire, 1);

    // Second one is rejected synchronously.
    let err = pool.acquire().await.unwrap_err();
    assert!(matches!(err, Error::QueueFull { max: 1 }));
    assert_eq!(
        err.to_string(),
        "pending acquire queue has reached its maximum size of 1"
    );
    assert_eq!(pool.metrics().pending_acquire, 1, "counter stays at the cap");

    held.release().await.unwrap();
    let granted = waiting.await.unwrap().expect("queued borrower succeeds");
    assert_eq!(*granted, 1);
    assert_eq!(new_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn zero_pending_capacity_forbids_waiting() {
    let new_count = Arc::new(AtomicU64::new(0));
    let pool = PoolBuilder::from(counting_allocator(&new_count))
        .size_max(1)
        .max_pending_acquire(0)
        .build()
        .await
        .unwrap();

    let _held = pool.acquire().await.unwrap();
    assert!(matches!(
        pool.acquire().await,
        Err(Error::QueueFull { max: 0 })
    ));
}

#[tokio::test]
async fn pending_gauge_rises_and_falls() {
    let new_count = Arc::new(AtomicU64::new(0));
    let pool = PoolBuilder::from(counting_allocator(&new_count))
        .size_max(1)
        .build()
        .await
        .unwrap();

    let held = pool.acquire().await.unwrap();
    assert_eq!(pool.metrics().pending_acquire, 0, "first acquire not pending");

    let waiting_pool = pool.clone();
    let waiting = tokio::spawn(async move { waiting_pool.acquire().await.unwrap() });
    settle().await;
    assert_eq!(pool.metrics().pending_acquire, 1);

    held.release().await.unwrap();
    let granted = waiting.await.unwrap();
    assert_eq!(pool.metrics().pending_acquire, 0);
    drop(granted);
}

#[tokio::test]
async fn fifo_batches_unblock_in_order() {
    let new_count = Arc::new(AtomicU64::new(0));
    let pool = PoolBuilder::from(counting_allocator(&new_count))
        .size_max(2)
        .build()
        .await
        .unwrap();

    let mut batch1 = Vec::new();
    for _ in 0..2 {
        batch1.push(pool.acquire().await.unwrap());
    }

    let mut batch2_handles = Vec::new();
    for _ in 0..2 {
        let pool = pool.clone();
        batch2_handles.push(tokio::spawn(async move { pool.acquire().await.unwrap() }));
        settle().await;
    }
    let mut batch3_handles = Vec::new();
    for _ in 0..2 {
        let pool = pool.clone();
        batch3_handles.push(tokio::spawn(async move { pool.acquire().await.unwrap() }));
        settle().await;
    }

    // Completing batch 1 unblocks exactly batch 2.
    for pooled in batch1 {
        pooled.release().await.unwrap();
    }
    let mut batch2 = Vec::new();
    for handle in batch2_handles {
        batch2.push(handle.await.unwrap());
    }
    assert_eq!(pool.metrics().pending_acquire, 2, "batch 3 still waits");

    // Completing batch 2 unblocks exactly batch 3.
    for pooled in batch2 {
        pooled.release().await.unwrap();
    }
    for handle in batch3_handles {
        handle.await.unwrap().release().await.unwrap();
    }
    assert_eq!(pool.metrics().pending_acquire, 0);
    assert_eq!(new_count.load(Ordering::SeqCst), 2, "two resources served all");
}

#[tokio::test]
async fn invalidate_promotes_waiter_into_fresh_allocation() {
    let new_count = Arc::new(AtomicU64::new(0));
    let destroyed = Arc::new(AtomicU64::new(0));
    let destroy_count = Arc::clone(&destroyed);
    let pool = PoolBuilder::from(counting_allocator(&new_count))
        .size_max(1)
        .initial_size(1)
        .destroy_handler(move |_value| {
            let destroyed = Arc::clone(&destroy_count);
            async move {
                destroyed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .build()
        .await
        .unwrap();

    let held = pool.acquire().await.unwrap();

    let waiting_pool = pool.clone();
    let waiting = tokio::spawn(async move { waiting_pool.acquire().await.unwrap() });
    settle().await;

    held.invalidate().await.unwrap();
    assert_eq!(destroyed.load(Ordering::SeqCst), 1);

    let granted = waiting.await.unwrap();
    assert_eq!(*granted, 2, "waiter promoted into a fresh allocation");
    assert_eq!(new_count.load(Ordering::SeqCst), 2);
}
