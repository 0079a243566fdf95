//! Queue of borrowers waiting for a resource.
//!
//! Each waiter holds the sending half of a oneshot grant channel; the
//! receiving half lives in the suspended `acquire` call. Cancellation
//! and timeouts remove waiters by id, so a grant can never target a
//! borrower that already gave up (a send to a vanished borrower fails
//! and the grant is rerouted).

use tokio::sync::oneshot;

use std::collections::VecDeque;

use crate::config::Order;
use crate::error::Result;
use crate::slot::PooledRef;

pub(crate) type GrantSender<T> = oneshot::Sender<Result<PooledRef<T>>>;
pub(crate) type GrantReceiver<T> = oneshot::Receiver<Result<PooledRef<T>>>;

pub(crate) struct Waiter<T: Send + 'static> {
    pub(crate) id: u64,
    pub(crate) tx: GrantSender<T>,
}

pub(crate) struct PendingQueue<T: Send + 'static> {
    waiters: VecDeque<Waiter<T>>,
}

impl<T: Send + 'static> PendingQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            waiters: VecDeque::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    pub(crate) fn push(&mut self, waiter: Waiter<T>) {
        self.waiters.push_back(waiter);
    }

    /// Next waiter to serve: the oldest under FIFO, the most recent
    /// under LIFO.
    pub(crate) fn pop(&mut self, order: Order) -> Option<Waiter<T>> {
        match order {
            Order::Fifo => self.waiters.pop_front(),
            Order::Lifo => self.waiters.pop_back(),
        }
    }

    /// Remove a waiter that timed out or cancelled. Returns false when
    /// the waiter was already popped for a grant or promotion.
    pub(crate) fn remove(&mut self, id: u64) -> bool {
        match self.waiters.iter().position(|waiter| waiter.id == id) {
            Some(index) => {
                self.waiters.remove(index);
                true
            }
            None => false,
        }
    }

    pub(crate) fn drain(&mut self) -> Vec<Waiter<T>> {
        self.waiters.drain(..).collect()
    }
}
