//! Grouping of a multi-ticket snapshot by target statement.
//!
//! Handles are compared by `Arc` identity and kept in the order they were
//! first seen across the snapshot,
//! and each handle's tickets in arrival order. A handle reached by exactly
//! one ticket stays [`Grouped::Single`] so the common case never allocates a
//! ticket list.

use std::sync::Arc;

use fxhash::FxHashMap;
use smallvec::{smallvec, SmallVec};

use crate::delta::DeltaRecord;
use crate::error::DispatchError;
use crate::latch::ConsumerLatch;
use crate::routing::same_view;
use crate::statement::{ConsumerView, StatementHandle};

/// Snapshot indices of the tickets targeting one statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Grouped {
    /// Exactly one ticket.
    Single(usize),
    /// Two or more tickets, in arrival order.
    Many(SmallVec<[usize; 4]>),
}

impl Grouped {
    fn push(&mut self, ticket: usize) {
        match self {
            Self::Single(first) => {
                let mut tickets = SmallVec::new();
                tickets.push(*first);
                tickets.push(ticket);
                *self = Self::Many(tickets);
            }
            Self::Many(tickets) => tickets.push(ticket),
        }
    }
}

/// Reusable per-worker grouping state.
///
/// Cleared at the end of every round, keeping its allocations.
#[derive(Default)]
pub(crate) struct GroupingScratch {
    index: FxHashMap<usize, usize>,
    groups: Vec<(Arc<dyn StatementHandle>, Grouped)>,
}

impl GroupingScratch {
    /// Records that ticket `ticket` of the snapshot targets `handle`.
    pub(crate) fn insert(&mut self, handle: &Arc<dyn StatementHandle>, ticket: usize) {
        let key = handle_key(handle);
        if let Some(&slot) = self.index.get(&key) {
            // A routing table lists each handle once, so `ticket` is new.
            self.groups[slot].1.push(ticket);
            return;
        }
        self.index.insert(key, self.groups.len());
        self.groups.push((Arc::clone(handle), Grouped::Single(ticket)));
    }

    /// Groups every routed statement of `snapshot`, in arrival order.
    pub(crate) fn group<E>(&mut self, snapshot: &[ConsumerLatch<E>]) {
        for (ticket, latch) in snapshot.iter().enumerate() {
            for entry in latch.routing().entries() {
                self.insert(entry.handle(), ticket);
            }
        }
    }

    /// Groups in first-seen order.
    pub(crate) fn groups(&self) -> &[(Arc<dyn StatementHandle>, Grouped)] {
        &self.groups
    }

    pub(crate) fn len(&self) -> usize {
        self.groups.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.index.clear();
        self.groups.clear();
    }
}

/// Address of the handle's data; stable while `groups` holds the `Arc`.
fn handle_key(handle: &Arc<dyn StatementHandle>) -> usize {
    Arc::as_ptr(handle).cast::<()>() as usize
}

impl std::fmt::Debug for GroupingScratch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupingScratch")
            .field("statements", &self.groups.len())
            .finish()
    }
}

/// Per-consumer deltas for one statement, in first-seen consumer order.
pub(crate) type ConsumerDeltas<E> = Vec<(Arc<dyn ConsumerView<E>>, DeltaRecord<E>)>;

/// Merges, per consumer view of `handle`, the deltas of `tickets` in
/// arrival order.
///
/// Each view's deltas are collected first and concatenated once.
///
/// # Errors
///
/// Returns [`DispatchError::MissingRoute`] if a grouped ticket's routing
/// table does not contain `handle`.
pub(crate) fn aggregate_by_view<E: Clone>(
    snapshot: &[ConsumerLatch<E>],
    tickets: &[usize],
    handle: &Arc<dyn StatementHandle>,
) -> Result<ConsumerDeltas<E>, DispatchError> {
    let mut parts: Vec<(Arc<dyn ConsumerView<E>>, SmallVec<[&DeltaRecord<E>; 4]>)> =
        Vec::new();
    for &ticket in tickets {
        let latch = &snapshot[ticket];
        for view in route_views(latch, handle)? {
            match parts.iter_mut().find(|(v, _)| same_view(v, view)) {
                Some((_, deltas)) => deltas.push(latch.delta()),
                None => parts.push((Arc::clone(view), smallvec![latch.delta()])),
            }
        }
    }
    Ok(parts
        .into_iter()
        .map(|(view, deltas)| (view, DeltaRecord::concat(&deltas)))
        .collect())
}

/// Consumer views of `handle` in `latch`'s routing table.
///
/// # Errors
///
/// Returns [`DispatchError::MissingRoute`] if the handle is not routed.
pub(crate) fn route_views<'a, E>(
    latch: &'a ConsumerLatch<E>,
    handle: &Arc<dyn StatementHandle>,
) -> Result<&'a [Arc<dyn ConsumerView<E>>], DispatchError> {
    latch
        .routing()
        .views_of(handle)
        .ok_or_else(|| DispatchError::MissingRoute {
            statement: handle.id(),
            window: Arc::clone(latch.window_name()),
            sequence: latch.sequence(),
        })
}
