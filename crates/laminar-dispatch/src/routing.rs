//! Per-ticket routing: which consumer views, under which statement, receive
//! a delta.
//!
//! A [`RoutingTable`] is an ordered list of [`RouteEntry`]s. A statement
//! handle appears at most once, compared by `Arc` identity; its consumer views keep registration order, and the
//! entries keep the order in which statements were first routed.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::statement::{ConsumerView, StatementHandle, StatementId};

/// Consumer views of one statement, in registration order.
pub type ConsumerViews<E> = SmallVec<[Arc<dyn ConsumerView<E>>; 2]>;

/// Identity comparison for consumer views (data pointer only).
#[inline]
#[must_use]
pub fn same_view<E>(a: &Arc<dyn ConsumerView<E>>, b: &Arc<dyn ConsumerView<E>>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Identity comparison for statement handles (data pointer only).
///
/// Distinct handles reporting the same [`StatementId`] are distinct
/// statements here, each with its own lock.
#[inline]
#[must_use]
pub fn same_handle(a: &Arc<dyn StatementHandle>, b: &Arc<dyn StatementHandle>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// One statement and the consumer views of it that receive a delta.
pub struct RouteEntry<E> {
    handle: Arc<dyn StatementHandle>,
    views: ConsumerViews<E>,
}

impl<E> RouteEntry<E> {
    /// The target statement.
    #[must_use]
    pub fn handle(&self) -> &Arc<dyn StatementHandle> {
        &self.handle
    }

    /// Consumer views, in registration order.
    #[must_use]
    pub fn views(&self) -> &[Arc<dyn ConsumerView<E>>] {
        &self.views
    }
}

impl<E> Clone for RouteEntry<E> {
    fn clone(&self) -> Self {
        Self {
            handle: Arc::clone(&self.handle),
            views: self.views.clone(),
        }
    }
}

impl<E> std::fmt::Debug for RouteEntry<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteEntry")
            .field("statement", &self.handle.id())
            .field("views", &self.views.len())
            .finish()
    }
}

/// Mapping from statement to the ordered consumer views receiving a delta.
pub struct RoutingTable<E> {
    entries: Vec<RouteEntry<E>>,
}

impl<E> RoutingTable<E> {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Routes `view` under `handle`.
    ///
    /// A handle already present keeps its position; the view is appended
    /// to its list unless it is already there.
    pub fn route(&mut self, handle: Arc<dyn StatementHandle>, view: Arc<dyn ConsumerView<E>>) {
        if let Some(entry) = self.entries.iter_mut().find(|e| same_handle(&e.handle, &handle)) {
            if !entry.views.iter().any(|v| same_view(v, &view)) {
                entry.views.push(view);
            }
            return;
        }
        let mut views = ConsumerViews::new();
        views.push(view);
        self.entries.push(RouteEntry { handle, views });
    }

    /// Removes `view` wherever it is routed. Statements left without views
    /// are dropped. Returns `true` if the view was found.
    pub fn remove_view(&mut self, view: &Arc<dyn ConsumerView<E>>) -> bool {
        let mut found = false;
        for entry in &mut self.entries {
            let before = entry.views.len();
            entry.views.retain(|v| !same_view(v, view));
            found |= entry.views.len() != before;
        }
        self.entries.retain(|e| !e.views.is_empty());
        found
    }

    /// Removes every handle with statement id `id`, with all of its views.
    /// Returns `true` if any was present.
    pub fn remove_statement(&mut self, id: StatementId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.handle.id() != id);
        self.entries.len() != before
    }

    /// Reorders entries by descending statement priority.
    ///
    /// The sort is stable: equal priorities keep their routing order.
    pub fn sort_by_priority(&mut self) {
        self.entries.sort_by_key(|e| std::cmp::Reverse(e.handle.priority()));
    }

    /// Entries in routing order.
    #[must_use]
    pub fn entries(&self) -> &[RouteEntry<E>] {
        &self.entries
    }

    /// Consumer views routed under `handle`, if it is present.
    #[must_use]
    pub fn views_of(
        &self,
        handle: &Arc<dyn StatementHandle>,
    ) -> Option<&[Arc<dyn ConsumerView<E>>]> {
        self.entries
            .iter()
            .find(|e| same_handle(&e.handle, handle))
            .map(RouteEntry::views)
    }

    /// Consumer views of the first handle with statement id `id`.
    #[must_use]
    pub fn views_for(&self, id: StatementId) -> Option<&[Arc<dyn ConsumerView<E>>]> {
        self.entries
            .iter()
            .find(|e| e.handle.id() == id)
            .map(RouteEntry::views)
    }

    /// Number of statements routed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no statement is routed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of consumer views across all statements.
    #[must_use]
    pub fn view_count(&self) -> usize {
        self.entries.iter().map(|e| e.views.len()).sum()
    }
}

impl<E> Default for RoutingTable<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for RoutingTable<E> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<E> std::fmt::Debug for RoutingTable<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.entries.iter()).finish()
    }
}
