//! Per-window latch factory wiring the causal chain.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::signal::CompletionSignal;
use super::ConsumerLatch;
use crate::config::LatchConfig;
use crate::delta::DeltaRecord;
use crate::routing::RoutingTable;

/// Issues [`ConsumerLatch`]es for one named window.
///
/// Every latch is linked to the latch issued just before it, so the
/// window's deltas complete in issue order no matter which threads
/// dispatch them. Creation is serialized; the factory only keeps the most
/// recent completion signal alive.
#[derive(Debug)]
pub struct LatchFactory {
    window: Arc<str>,
    config: LatchConfig,
    tail: Mutex<Option<Arc<CompletionSignal>>>,
    next_sequence: AtomicU64,
}

impl LatchFactory {
    /// Creates a factory for the named window.
    #[must_use]
    pub fn new(window: impl Into<Arc<str>>, config: LatchConfig) -> Self {
        Self {
            window: window.into(),
            config,
            tail: Mutex::new(None),
            next_sequence: AtomicU64::new(0),
        }
    }

    /// Window this factory issues latches for.
    #[must_use]
    pub fn window(&self) -> &str {
        &self.window
    }

    /// Latch configuration.
    #[must_use]
    pub fn config(&self) -> &LatchConfig {
        &self.config
    }

    /// Number of latches issued so far.
    #[must_use]
    pub fn issued(&self) -> u64 {
        self.next_sequence.load(Ordering::Relaxed)
    }

    /// Issues the next latch of the chain for `delta`.
    ///
    /// Latches of one window must reach any single queue in issue order;
    /// [`DispatchQueue::enqueue_with`](crate::DispatchQueue::enqueue_with)
    /// issues and enqueues under the queue lock.
    pub fn new_latch<E>(
        &self,
        delta: DeltaRecord<E>,
        routing: Arc<RoutingTable<E>>,
    ) -> ConsumerLatch<E> {
        let signal = Arc::new(CompletionSignal::new());
        let mut tail = self.tail.lock();
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let predecessor = if self.config.preserve_order {
            tail.replace(Arc::clone(&signal))
        } else {
            None
        };
        drop(tail);

        ConsumerLatch {
            delta,
            routing,
            signal,
            predecessor,
            window: Arc::clone(&self.window),
            sequence,
            wait_strategy: self.config.wait_strategy,
            timeout: self.config.timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LatchConfig;

    fn latch(factory: &LatchFactory) -> ConsumerLatch<i32> {
        factory.new_latch(DeltaRecord::insert_only(vec![1]), Arc::new(RoutingTable::new()))
    }

    #[test]
    fn test_factory_links_consecutive_latches() {
        let factory = LatchFactory::new("w", LatchConfig::default());
        let first = latch(&factory);
        let second = latch(&factory);

        assert!(first.predecessor.is_none());
        let pred = second.predecessor.as_ref().unwrap();
        assert!(Arc::ptr_eq(pred, &first.signal));
        assert_eq!(first.sequence(), 0);
        assert_eq!(second.sequence(), 1);
        assert_eq!(factory.issued(), 2);
        assert_eq!(second.window(), "w");
    }

    #[test]
    fn test_factory_unordered_has_no_predecessor() {
        let factory = LatchFactory::new("w", LatchConfig::unordered());
        let _first = latch(&factory);
        let second = latch(&factory);
        assert!(second.predecessor.is_none());
    }

    #[test]
    fn test_factory_concurrent_issue_builds_single_chain() {
        let factory = Arc::new(LatchFactory::new("w", LatchConfig::default()));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let f = Arc::clone(&factory);
                std::thread::spawn(move || {
                    (0..50)
                        .map(|_| {
                            let l = latch(&f);
                            let pred = l.predecessor.as_ref().map(|p| Arc::as_ptr(p) as usize);
                            (l.sequence(), Arc::as_ptr(&l.signal) as usize, pred)
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all: Vec<_> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_by_key(|(seq, _, _)| *seq);

        assert_eq!(all.len(), 200);
        assert!(all[0].2.is_none());
        for pair in all.windows(2) {
            assert_eq!(pair[1].2, Some(pair[0].1));
        }
    }
}
