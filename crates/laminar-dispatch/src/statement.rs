//! Statement-side contracts consumed by the dispatcher.
//!
//! The dispatcher never owns statements. It reaches a running statement
//! through [`StatementHandle`] (identity, lock, priority, capability flags)
//! and delivers deltas to the statement's [`ConsumerView`]s.

use std::fmt;

use crate::error::ProcessingError;
use crate::metrics::MetricsHandle;

/// Exclusive lock guarding a statement's execution state.
///
/// The dispatcher takes it in write mode for the duration of one apply step.
pub type StatementLock = parking_lot::RwLock<()>;

/// Stable identity of a running statement instance.
///
/// Used as the grouping key when several tickets of one round target the
/// same statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatementId(pub u64);

impl fmt::Display for StatementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stmt-{}", self.0)
    }
}

/// Execution handle of one running statement.
///
/// Implementations must keep [`id`](Self::id) stable for the lifetime of
/// the handle: two handles with the same id are treated as the same
/// statement.
pub trait StatementHandle: Send + Sync {
    /// Statement identity.
    fn id(&self) -> StatementId;

    /// Statement name, used in logs and exception reports.
    fn name(&self) -> &str;

    /// The statement's exclusive lock.
    ///
    /// Held by the dispatcher while consumer views update and while
    /// [`internal_dispatch`](Self::internal_dispatch) runs, so neither may
    /// take it again.
    fn lock(&self) -> &StatementLock;

    /// Whether delivery stops after this statement in prioritized mode.
    fn is_preemptive(&self) -> bool {
        false
    }

    /// Statement priority; higher values are delivered first in prioritized
    /// mode.
    fn priority(&self) -> i32 {
        0
    }

    /// Whether the statement reads shared variables.
    fn has_variables(&self) -> bool {
        false
    }

    /// Whether the statement reads or writes tables.
    fn has_table_access(&self) -> bool {
        false
    }

    /// Timing handle, if the statement reports metrics.
    fn metrics_handle(&self) -> Option<&MetricsHandle> {
        None
    }

    /// Secondary dispatch run after all of this statement's consumer views
    /// were updated (join and subquery propagation).
    ///
    /// # Errors
    ///
    /// Returns [`ProcessingError`] if the propagation fails; the failure is
    /// isolated to this statement.
    fn internal_dispatch(&self) -> Result<(), ProcessingError> {
        Ok(())
    }
}

/// A statement-owned subscriber that receives window deltas.
///
/// `update` is always called with the owning statement's lock held, so
/// implementations only need interior mutability, not their own
/// synchronization against other dispatchers.
pub trait ConsumerView<E>: Send + Sync {
    /// Applies inserted and removed items, each in production order.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessingError`] if the view cannot apply the change.
    fn update(&self, inserted: &[E], removed: &[E]) -> Result<(), ProcessingError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Bare {
        lock: StatementLock,
    }

    impl StatementHandle for Bare {
        fn id(&self) -> StatementId {
            StatementId(9)
        }

        fn name(&self) -> &str {
            "bare"
        }

        fn lock(&self) -> &StatementLock {
            &self.lock
        }
    }

    #[test]
    fn test_statement_id_display() {
        assert_eq!(StatementId(42).to_string(), "stmt-42");
    }

    #[test]
    fn test_statement_handle_defaults() {
        let h = Bare {
            lock: StatementLock::new(()),
        };
        assert!(!h.is_preemptive());
        assert_eq!(h.priority(), 0);
        assert!(!h.has_variables());
        assert!(!h.has_table_access());
        assert!(h.metrics_handle().is_none());
        assert!(h.internal_dispatch().is_ok());
    }
}
