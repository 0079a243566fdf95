//! Ordered idle storage, optionally partitioned per carrier thread.

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::thread;

use crate::config::Order;
use crate::slot::SlotState;

/// An idle resource together with its slot state.
pub(crate) struct IdleEntry<T> {
    pub(crate) value: T,
    pub(crate) slot: Arc<SlotState>,
}

/// Container of currently idle resources.
///
/// In affinity mode the store is split into one deque per carrier
/// thread: a pop probes the calling thread's partition first and then
/// steals from the others in a fixed rotation, and a push lands in the
/// pushing thread's partition. Ordering applies within each partition.
pub(crate) enum IdleStore<T> {
    Single(VecDeque<IdleEntry<T>>),
    Partitioned(Vec<VecDeque<IdleEntry<T>>>),
}

impl<T> IdleStore<T> {
    pub(crate) fn new(affinity: bool) -> Self {
        if affinity {
            let partitions = thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(1);
            Self::Partitioned((0..partitions).map(|_| VecDeque::new()).collect())
        } else {
            Self::Single(VecDeque::new())
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            Self::Single(entries) => entries.len(),
            Self::Partitioned(partitions) => partitions.iter().map(VecDeque::len).sum(),
        }
    }

    fn home_partition(partition_count: usize) -> usize {
        let mut hasher = DefaultHasher::new();
        thread::current().id().hash(&mut hasher);
        (hasher.finish() as usize) % partition_count
    }

    pub(crate) fn pop(&mut self, order: Order) -> Option<IdleEntry<T>> {
        match self {
            Self::Single(entries) => pop_ordered(entries, order),
            Self::Partitioned(partitions) => {
                let home = Self::home_partition(partitions.len());
                let count = partitions.len();
                for offset in 0..count {
                    let entry = pop_ordered(&mut partitions[(home + offset) % count], order);
                    if entry.is_some() {
                        return entry;
                    }
                }
                None
            }
        }
    }

    pub(crate) fn push(&mut self, entry: IdleEntry<T>) {
        match self {
            Self::Single(entries) => entries.push_back(entry),
            Self::Partitioned(partitions) => {
                let home = Self::home_partition(partitions.len());
                partitions[home].push_back(entry);
            }
        }
    }

    pub(crate) fn drain(&mut self) -> Vec<IdleEntry<T>> {
        match self {
            Self::Single(entries) => entries.drain(..).collect(),
            Self::Partitioned(partitions) => partitions
                .iter_mut()
                .flat_map(|partition| partition.drain(..))
                .collect(),
        }
    }
}

fn pop_ordered<T>(entries: &mut VecDeque<IdleEntry<T>>, order: Order) -> Option<IdleEntry<T>> {
    match order {
        Order::Fifo => entries.pop_front(),
        Order::Lifo => entries.pop_back(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(value: u32) -> IdleEntry<u32> {
        IdleEntry {
            value,
            slot: SlotState::new_idle(),
        }
    }

    #[test]
    fn fifo_pops_oldest_first() {
        let mut store = IdleStore::new(false);
        store.push(entry(1));
        store.push(entry(2));
        store.push(entry(3));

        assert_eq!(store.pop(Order::Fifo).map(|e| e.value), Some(1));
        assert_eq!(store.pop(Order::Fifo).map(|e| e.value), Some(2));
        assert_eq!(store.pop(Order::Fifo).map(|e| e.value), Some(3));
        assert!(store.pop(Order::Fifo).is_none());
    }

    #[test]
    fn lifo_pops_newest_first() {
        let mut store = IdleStore::new(false);
        store.push(entry(1));
        store.push(entry(2));
        store.push(entry(3));

        assert_eq!(store.pop(Order::Lifo).map(|e| e.value), Some(3));
        assert_eq!(store.pop(Order::Lifo).map(|e| e.value), Some(2));
        assert_eq!(store.pop(Order::Lifo).map(|e| e.value), Some(1));
    }

    #[test]
    fn partitioned_prefers_home_then_steals() {
        // Two partitions: one seeded out-of-band to simulate another
        // thread's releases, plus the current thread's own.
        let mut partitions: Vec<VecDeque<IdleEntry<u32>>> = vec![VecDeque::new(), VecDeque::new()];
        let home = IdleStore::<u32>::home_partition(2);
        let other = (home + 1) % 2;
        partitions[other].push_back(entry(99));
        let mut store = IdleStore::Partitioned(partitions);

        store.push(entry(1));
        assert_eq!(store.len(), 2);

        // Home partition first, then the steal finds the foreign entry.
        assert_eq!(store.pop(Order::Fifo).map(|e| e.value), Some(1));
        assert_eq!(store.pop(Order::Fifo).map(|e| e.value), Some(99));
        assert!(store.pop(Order::Fifo).is_none());
    }

    #[test]
    fn drain_empties_every_partition() {
        let mut partitions: Vec<VecDeque<IdleEntry<u32>>> = vec![VecDeque::new(), VecDeque::new()];
        partitions[0].push_back(entry(1));
        partitions[1].push_back(entry(2));
        let mut store = IdleStore::Partitioned(partitions);

        let drained = store.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(store.len(), 0);
    }
}
