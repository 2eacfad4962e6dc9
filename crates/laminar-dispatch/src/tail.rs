//! # Window Tail
//!
//! Producer side of a named window: the consumer views registered against
//! the window and the latch factory ordering its deltas.
//!
//! Registration is copy-on-write. Every published ticket shares the routing
//! table current at publish time; later registration changes build a new
//! table and never affect tickets already in flight.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::{DispatchConfig, LatchConfig};
use crate::delta::DeltaRecord;
use crate::dispatch::DispatchQueue;
use crate::latch::LatchFactory;
use crate::routing::RoutingTable;
use crate::statement::{ConsumerView, StatementHandle, StatementId};

/// Consumer registry and ticket source of one named window.
pub struct WindowTail<E> {
    name: Arc<str>,
    factory: LatchFactory,
    consumers: RwLock<Arc<RoutingTable<E>>>,
    prioritized: bool,
}

impl<E> WindowTail<E> {
    /// Creates a tail for the named window, dispatched by an engine
    /// configured with `dispatch`.
    ///
    /// When `dispatch` is prioritized, statements are routed by descending
    /// priority (ties in registration order) so preemption sees them in the
    /// same order; otherwise in registration order.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>, latch: LatchConfig, dispatch: &DispatchConfig) -> Self {
        let name = name.into();
        Self {
            factory: LatchFactory::new(Arc::clone(&name), latch),
            name,
            consumers: RwLock::new(Arc::new(RoutingTable::new())),
            prioritized: dispatch.prioritized,
        }
    }

    /// Returns `true` if routing follows statement priority.
    #[must_use]
    pub fn is_prioritized(&self) -> bool {
        self.prioritized
    }

    /// Window name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The window's latch factory.
    #[must_use]
    pub fn factory(&self) -> &LatchFactory {
        &self.factory
    }

    /// Registers `view` as a consumer of this window under `handle`.
    pub fn add_consumer(&self, handle: Arc<dyn StatementHandle>, view: Arc<dyn ConsumerView<E>>) {
        let id = handle.id();
        self.modify(|table| {
            table.route(handle, view);
            true
        });
        tracing::debug!(window = %self.name, statement = %id, "Consumer view registered");
    }

    /// Unregisters `view`. Returns `true` if it was registered.
    pub fn remove_consumer(&self, view: &Arc<dyn ConsumerView<E>>) -> bool {
        let removed = self.modify(|table| table.remove_view(view));
        if removed {
            tracing::debug!(window = %self.name, "Consumer view removed");
        }
        removed
    }

    /// Unregisters every consumer view of a statement. Returns `true` if
    /// the statement was registered.
    pub fn remove_statement(&self, id: StatementId) -> bool {
        let removed = self.modify(|table| table.remove_statement(id));
        if removed {
            tracing::debug!(window = %self.name, statement = %id, "Statement consumers removed");
        }
        removed
    }

    /// Current routing table.
    #[must_use]
    pub fn consumers(&self) -> Arc<RoutingTable<E>> {
        Arc::clone(&self.consumers.read())
    }

    /// Number of registered consumer views.
    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.consumers.read().view_count()
    }

    /// Issues a ticket for `delta` and enqueues it on `queue`.
    ///
    /// Returns `false` without issuing a ticket when the delta is empty or
    /// nothing consumes the window.
    pub fn publish(&self, queue: &DispatchQueue<E>, delta: DeltaRecord<E>) -> bool {
        if delta.is_empty() {
            return false;
        }
        let routing = self.consumers();
        if routing.is_empty() {
            return false;
        }
        queue.enqueue_with(|| self.factory.new_latch(delta, routing));
        true
    }

    fn modify(&self, change: impl FnOnce(&mut RoutingTable<E>) -> bool) -> bool {
        let mut current = self.consumers.write();
        let mut next = RoutingTable::clone(&current);
        if !change(&mut next) {
            return false;
        }
        if self.prioritized {
            next.sort_by_priority();
        }
        *current = Arc::new(next);
        true
    }
}

impl<E> std::fmt::Debug for WindowTail<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowTail")
            .field("name", &self.name)
            .field("prioritized", &self.prioritized)
            .field("consumers", &self.consumer_count())
            .field("issued", &self.factory.issued())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockStatement, RecordingView};

    fn make_tail(prioritized: bool) -> WindowTail<i32> {
        let dispatch = DispatchConfig::builder().prioritized(prioritized).build();
        WindowTail::new("w", LatchConfig::default(), &dispatch)
    }

    fn ids(table: &RoutingTable<i32>) -> Vec<u64> {
        table.entries().iter().map(|e| e.handle().id().0).collect()
    }

    #[test]
    fn test_publish_requires_consumers_and_data() {
        let tail = make_tail(false);
        let queue = DispatchQueue::new();

        assert!(!tail.publish(&queue, DeltaRecord::insert_only(vec![1])));
        tail.add_consumer(MockStatement::new(1, "s1"), RecordingView::<i32>::new());
        assert!(!tail.publish(&queue, DeltaRecord::default()));
        assert!(tail.publish(&queue, DeltaRecord::insert_only(vec![1])));

        assert_eq!(queue.len(), 1);
        assert_eq!(tail.factory().issued(), 1);
    }

    #[test]
    fn test_registration_is_copy_on_write() {
        let tail = make_tail(false);
        tail.add_consumer(MockStatement::new(1, "s1"), RecordingView::<i32>::new());
        let before = tail.consumers();

        tail.add_consumer(MockStatement::new(2, "s2"), RecordingView::<i32>::new());
        assert_eq!(ids(&before), vec![1]);
        assert_eq!(ids(&tail.consumers()), vec![1, 2]);
        assert_eq!(tail.consumer_count(), 2);
    }

    #[test]
    fn test_prioritized_orders_by_priority() {
        let tail = make_tail(true);
        assert!(tail.is_prioritized());
        for (id, priority) in [(1, 0), (2, 10), (3, 5), (4, 10)] {
            let stmt = MockStatement::builder(id, "stmt").priority(priority).build();
            tail.add_consumer(stmt, RecordingView::<i32>::new());
        }
        assert_eq!(ids(&tail.consumers()), vec![2, 4, 3, 1]);
    }

    #[test]
    fn test_unprioritized_keeps_registration_order() {
        let tail = make_tail(false);
        for (id, priority) in [(1, 0), (2, 10)] {
            let stmt = MockStatement::builder(id, "stmt").priority(priority).build();
            tail.add_consumer(stmt, RecordingView::<i32>::new());
        }
        assert_eq!(ids(&tail.consumers()), vec![1, 2]);
    }

    #[test]
    fn test_ordering_follows_dispatch_config() {
        let service = crate::DispatchService::new(
            DispatchConfig::builder().prioritized(true).build(),
        );
        let tail = WindowTail::<i32>::new("w", LatchConfig::default(), service.config());
        assert!(tail.is_prioritized());
        let low = MockStatement::builder(1, "low").priority(1).build();
        let high = MockStatement::builder(2, "high").priority(9).build();
        tail.add_consumer(low, RecordingView::<i32>::new());
        tail.add_consumer(high, RecordingView::<i32>::new());
        assert_eq!(ids(&tail.consumers()), vec![2, 1]);

        let dispatch = DispatchConfig::default();
        let plain = WindowTail::<i32>::new("w", LatchConfig::default(), &dispatch);
        assert!(!plain.is_prioritized());
    }

    #[test]
    fn test_remove_consumer_and_statement() {
        let tail = make_tail(false);
        let v1: Arc<dyn ConsumerView<i32>> = RecordingView::<i32>::new();
        tail.add_consumer(MockStatement::new(1, "s1"), Arc::clone(&v1));
        tail.add_consumer(MockStatement::new(2, "s2"), RecordingView::<i32>::new());

        assert!(tail.remove_consumer(&v1));
        assert!(!tail.remove_consumer(&v1));
        assert_eq!(ids(&tail.consumers()), vec![2]);

        assert!(tail.remove_statement(StatementId(2)));
        assert!(!tail.remove_statement(StatementId(2)));
        assert_eq!(tail.consumer_count(), 0);
    }

    #[test]
    fn test_published_tickets_are_chained() {
        let dispatch = DispatchConfig::default();
        let tail = WindowTail::<i32>::new("orders", LatchConfig::default(), &dispatch);
        tail.add_consumer(MockStatement::new(1, "s1"), RecordingView::<i32>::new());
        let queue = DispatchQueue::new();

        tail.publish(&queue, DeltaRecord::insert_only(vec![1]));
        tail.publish(&queue, DeltaRecord::insert_only(vec![2]));

        let snapshot = queue.drain_snapshot();
        assert_eq!(snapshot[0].sequence(), 0);
        assert_eq!(snapshot[1].sequence(), 1);
        assert_eq!(snapshot[1].window(), "orders");
    }
}
