//! Statement apply step.
//!
//! Delivers one round's delta(s) to the consumer views of one statement
//! under that statement's exclusive lock. Failures and panics raised by the
//! statement are caught here, reported to the exception handler and
//! suppressed; they never reach the dispatch round.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::config::DispatchConfig;
use crate::delta::DeltaRecord;
use crate::error::{ExceptionKind, ProcessingError};
use crate::metrics::{DispatcherMetrics, StatementTimer};
use crate::services::{EngineServices, TableService};
use crate::statement::{ConsumerView, StatementHandle};

use super::grouping::ConsumerDeltas;

/// Releases table locks acquired during an apply step when dropped.
///
/// Dropped before the statement lock, on every exit path.
struct TableLockRelease<'a> {
    tables: Option<&'a dyn TableService>,
}

impl Drop for TableLockRelease<'_> {
    fn drop(&mut self) {
        if let Some(tables) = self.tables {
            tables.release_acquired_locks();
        }
    }
}

/// Applies deltas to one statement at a time.
#[derive(Clone, Copy)]
pub(crate) struct StatementApplier<'a> {
    pub(crate) config: &'a DispatchConfig,
    pub(crate) services: &'a EngineServices,
    pub(crate) metrics: &'a DispatcherMetrics,
}

impl StatementApplier<'_> {
    /// Applies one delta to every view of `handle`, in table order.
    pub(crate) fn apply_single<E>(
        &self,
        handle: &dyn StatementHandle,
        delta: &DeltaRecord<E>,
        views: &[Arc<dyn ConsumerView<E>>],
    ) {
        let _span = tracing::trace_span!(
            "statement_apply",
            statement = %handle.id(),
            views = views.len()
        )
        .entered();
        self.apply_with(handle, || {
            for view in views {
                view.update(delta.inserted(), delta.removed())?;
            }
            Ok(())
        });
    }

    /// Applies each view's aggregated delta, in aggregation order.
    pub(crate) fn apply_multiple<E>(&self, handle: &dyn StatementHandle, deltas: &ConsumerDeltas<E>) {
        let _span = tracing::trace_span!(
            "statement_apply_multi",
            statement = %handle.id(),
            views = deltas.len()
        )
        .entered();
        self.apply_with(handle, || {
            for (view, delta) in deltas {
                view.update(delta.inserted(), delta.removed())?;
            }
            Ok(())
        });
    }

    fn timing_enabled(&self, handle: &dyn StatementHandle) -> bool {
        self.config.metrics_reporting && handle.metrics_handle().is_some_and(|m| m.is_enabled())
    }

    fn apply_with<F>(&self, handle: &dyn StatementHandle, update: F)
    where
        F: FnOnce() -> Result<(), ProcessingError>,
    {
        let lock = handle.lock().write();
        let timer = self.timing_enabled(handle).then(StatementTimer::start);
        let tables = TableLockRelease {
            tables: handle.has_table_access().then_some(&*self.services.tables),
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            if handle.has_variables() {
                self.services.variables.set_local_version();
            }
            update()?;
            handle.internal_dispatch()
        }));
        let result =
            outcome.unwrap_or_else(|payload| Err(ProcessingError::from_panic(payload.as_ref())));

        self.metrics.statements_applied.fetch_add(1, Ordering::Relaxed);
        if let Err(error) = result {
            self.metrics.statement_failures.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(statement = %handle.id(), %error, "Isolated statement failure");
            self.services
                .exception_handler
                .handle_exception(&error, handle, ExceptionKind::Process);
        }

        drop(tables);
        drop(lock);

        if let Some(timer) = timer {
            let (cpu, wall) = timer.stop();
            if let Some(metrics) = handle.metrics_handle() {
                self.services.metrics_sink.account_time(metrics, cpu, wall, 1);
            }
        }
    }
}
