//! Immutable insert/remove change batches.
//!
//! A [`DeltaRecord`] is what one window mutation produced: the items it
//! inserted and the items it removed, each in production order. Records are
//! never mutated after construction; [`DeltaRecord::merge`] and
//! [`DeltaRecord::concat`] allocate a new record whose sequences are the
//! earlier records' followed by the later records'.

use std::sync::Arc;

/// Inserted and removed items produced by one window change.
///
/// Cloning is cheap: both sequences are shared behind an [`Arc`].
#[derive(Debug)]
pub struct DeltaRecord<E> {
    inserted: Arc<[E]>,
    removed: Arc<[E]>,
}

impl<E> Clone for DeltaRecord<E> {
    fn clone(&self) -> Self {
        Self {
            inserted: Arc::clone(&self.inserted),
            removed: Arc::clone(&self.removed),
        }
    }
}

impl<E> DeltaRecord<E> {
    /// Creates a delta from inserted and removed items.
    #[must_use]
    pub fn new(inserted: Vec<E>, removed: Vec<E>) -> Self {
        Self {
            inserted: inserted.into(),
            removed: removed.into(),
        }
    }

    /// Creates an insert-only delta.
    #[must_use]
    pub fn insert_only(inserted: Vec<E>) -> Self {
        Self::new(inserted, Vec::new())
    }

    /// Creates a remove-only delta.
    #[must_use]
    pub fn remove_only(removed: Vec<E>) -> Self {
        Self::new(Vec::new(), removed)
    }

    /// Items inserted by the change, in production order.
    #[inline]
    #[must_use]
    pub fn inserted(&self) -> &[E] {
        &self.inserted
    }

    /// Items removed by the change, in production order.
    #[inline]
    #[must_use]
    pub fn removed(&self) -> &[E] {
        &self.removed
    }

    /// Returns `true` if the delta carries neither inserts nor removals.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.removed.is_empty()
    }

    /// Total number of inserted plus removed items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inserted.len() + self.removed.len()
    }
}

impl<E: Clone> DeltaRecord<E> {
    /// Merges `self` (earlier) with `later`.
    ///
    /// The result's inserted sequence is `self.inserted ++ later.inserted` and
    /// its removed sequence is `self.removed ++ later.removed`. Neither input
    /// is modified. Sides that are empty on one input reuse the other
    /// input's buffer instead of copying.
    #[must_use]
    pub fn merge(&self, later: &Self) -> Self {
        Self::concat(&[self, later])
    }

    /// Concatenates `parts`, earliest first, into one record.
    ///
    /// Equivalent to folding [`merge`](Self::merge) over `parts`, but each
    /// side is copied once into a buffer of its final size. A side only one
    /// part contributes to reuses that part's buffer.
    #[must_use]
    pub fn concat(parts: &[&Self]) -> Self {
        Self {
            inserted: concat_sides(parts.iter().map(|d| &d.inserted)),
            removed: concat_sides(parts.iter().map(|d| &d.removed)),
        }
    }
}

fn concat_sides<'a, E, I>(sides: I) -> Arc<[E]>
where
    E: Clone + 'a,
    I: Iterator<Item = &'a Arc<[E]>> + Clone,
{
    let mut non_empty = sides.filter(|side| !side.is_empty());
    let Some(first) = non_empty.next() else {
        return Vec::<E>::new().into();
    };
    if non_empty.clone().next().is_none() {
        return Arc::clone(first);
    }
    let len = first.len() + non_empty.clone().map(|side| side.len()).sum::<usize>();
    let mut out: Vec<E> = Vec::with_capacity(len);
    out.extend_from_slice(first);
    for side in non_empty {
        out.extend_from_slice(side);
    }
    out.into()
}

impl<E> Default for DeltaRecord<E> {
    fn default() -> Self {
        Self::new(Vec::new(), Vec::new())
    }
}

impl<E: PartialEq> PartialEq for DeltaRecord<E> {
    fn eq(&self, other: &Self) -> bool {
        self.inserted == other.inserted && self.removed == other.removed
    }
}

impl<E: Eq> Eq for DeltaRecord<E> {}
