//! Per-thread queue of pending tickets.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::latch::ConsumerLatch;

/// Round ids are unique across all queues; zero means "not drained".
static NEXT_ROUND: AtomicU64 = AtomicU64::new(1);

/// Pending tickets of one dispatch worker, in enqueue order.
///
/// Cloning yields another handle to the same queue, so consumer views
/// running inside a dispatch round can enqueue follow-up tickets. Those are
/// picked up by the next round of the same [`dispatch`] call.
///
/// [`dispatch`]: super::DispatchWorker::dispatch
pub struct DispatchQueue<E> {
    inner: Arc<Mutex<Vec<ConsumerLatch<E>>>>,
}

impl<E> DispatchQueue<E> {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Appends a ticket.
    ///
    /// Tickets of one window must be appended in the order their factory
    /// issued them. Use [`enqueue_with`](Self::enqueue_with) when several
    /// producers share this queue.
    pub fn enqueue(&self, latch: ConsumerLatch<E>) {
        self.inner.lock().push(latch);
    }

    /// Issues a ticket and appends it under the queue lock, so concurrent
    /// producers append the tickets of one window in issue order.
    pub fn enqueue_with(&self, issue: impl FnOnce() -> ConsumerLatch<E>) {
        let mut pending = self.inner.lock();
        pending.push(issue());
    }

    /// Takes every pending ticket, leaving the queue empty, and stamps them
    /// with a fresh round id.
    ///
    /// Tickets enqueued after this call belong to the next snapshot.
    pub(crate) fn drain_snapshot(&self) -> Vec<ConsumerLatch<E>> {
        let snapshot = std::mem::take(&mut *self.inner.lock());
        let round = NEXT_ROUND.fetch_add(1, Ordering::Relaxed);
        for latch in &snapshot {
            latch.join_round(round);
        }
        snapshot
    }

    /// Number of pending tickets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns `true` if no ticket is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Drops every pending ticket. Dropped tickets complete, so their
    /// successors are released.
    pub fn clear(&self) {
        let pending = self.drain_snapshot();
        drop(pending);
    }
}

impl<E> Clone for DispatchQueue<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> Default for DispatchQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for DispatchQueue<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("pending", &self.len())
            .finish()
    }
}
