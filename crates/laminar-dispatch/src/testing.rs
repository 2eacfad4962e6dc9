//! Testing utilities for dispatch collaborators.
//!
//! Provides mock statements, recording consumer views and recording engine
//! services for unit tests, integration tests and benchmarks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{ExceptionKind, ProcessingError};
use crate::metrics::{MetricsHandle, MetricsSink};
use crate::services::{ExceptionHandler, TableService, VariableService};
use crate::statement::{ConsumerView, StatementHandle, StatementId, StatementLock};

// ---------------------------------------------------------------------------
// MockStatement
// ---------------------------------------------------------------------------

/// Mock statement handle with configurable flags.
///
/// Counts internal dispatches and records whether its lock was held while
/// they ran.
#[derive(Debug)]
pub struct MockStatement {
    id: StatementId,
    name: String,
    lock: StatementLock,
    preemptive: bool,
    priority: i32,
    has_variables: bool,
    has_table_access: bool,
    metrics: Option<MetricsHandle>,
    fail_internal_dispatch: bool,
    internal_dispatches: AtomicU64,
    unlocked_dispatches: AtomicU64,
}

impl MockStatement {
    /// Creates a statement with default flags.
    #[must_use]
    pub fn new(id: u64, name: &str) -> Arc<Self> {
        Self::builder(id, name).build()
    }

    /// Creates a builder for a statement with custom flags.
    #[must_use]
    pub fn builder(id: u64, name: &str) -> MockStatementBuilder {
        MockStatementBuilder {
            id,
            name: name.to_string(),
            preemptive: false,
            priority: 0,
            has_variables: false,
            has_table_access: false,
            metrics_enabled: None,
            fail_internal_dispatch: false,
        }
    }

    /// Number of internal dispatches run.
    #[must_use]
    pub fn internal_dispatch_count(&self) -> u64 {
        self.internal_dispatches.load(Ordering::SeqCst)
    }

    /// Returns `true` if every internal dispatch ran with the lock held.
    #[must_use]
    pub fn lock_held_during_dispatch(&self) -> bool {
        self.unlocked_dispatches.load(Ordering::SeqCst) == 0
    }

    /// Returns `true` if the statement lock is currently free.
    #[must_use]
    pub fn is_unlocked(&self) -> bool {
        !self.lock.is_locked()
    }
}

impl StatementHandle for MockStatement {
    fn id(&self) -> StatementId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> &StatementLock {
        &self.lock
    }

    fn is_preemptive(&self) -> bool {
        self.preemptive
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn has_variables(&self) -> bool {
        self.has_variables
    }

    fn has_table_access(&self) -> bool {
        self.has_table_access
    }

    fn metrics_handle(&self) -> Option<&MetricsHandle> {
        self.metrics.as_ref()
    }

    fn internal_dispatch(&self) -> Result<(), ProcessingError> {
        self.internal_dispatches.fetch_add(1, Ordering::SeqCst);
        if !self.lock.is_locked_exclusive() {
            self.unlocked_dispatches.fetch_add(1, Ordering::SeqCst);
        }
        if self.fail_internal_dispatch {
            return Err(ProcessingError::InternalDispatchFailed(format!(
                "join propagation failed for {}",
                self.name
            )));
        }
        Ok(())
    }
}

/// Builder for [`MockStatement`].
#[derive(Debug)]
pub struct MockStatementBuilder {
    id: u64,
    name: String,
    preemptive: bool,
    priority: i32,
    has_variables: bool,
    has_table_access: bool,
    metrics_enabled: Option<bool>,
    fail_internal_dispatch: bool,
}

impl MockStatementBuilder {
    /// Marks the statement preemptive.
    #[must_use]
    pub fn preemptive(mut self, preemptive: bool) -> Self {
        self.preemptive = preemptive;
        self
    }

    /// Sets the priority.
    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Declares variable reads.
    #[must_use]
    pub fn variables(mut self, enabled: bool) -> Self {
        self.has_variables = enabled;
        self
    }

    /// Declares table access.
    #[must_use]
    pub fn table_access(mut self, enabled: bool) -> Self {
        self.has_table_access = enabled;
        self
    }

    /// Attaches a metrics handle, enabled or not.
    #[must_use]
    pub fn metrics(mut self, enabled: bool) -> Self {
        self.metrics_enabled = Some(enabled);
        self
    }

    /// Makes every internal dispatch fail.
    #[must_use]
    pub fn failing_internal_dispatch(mut self) -> Self {
        self.fail_internal_dispatch = true;
        self
    }

    /// Builds the statement.
    #[must_use]
    pub fn build(self) -> Arc<MockStatement> {
        let metrics = self
            .metrics_enabled
            .map(|enabled| MetricsHandle::new(self.name.as_str(), enabled));
        Arc::new(MockStatement {
            id: StatementId(self.id),
            name: self.name,
            lock: StatementLock::new(()),
            preemptive: self.preemptive,
            priority: self.priority,
            has_variables: self.has_variables,
            has_table_access: self.has_table_access,
            metrics,
            fail_internal_dispatch: self.fail_internal_dispatch,
            internal_dispatches: AtomicU64::new(0),
            unlocked_dispatches: AtomicU64::new(0),
        })
    }
}

// ---------------------------------------------------------------------------
// RecordingView
// ---------------------------------------------------------------------------

/// What a [`RecordingView`] does on update.
enum ViewBehavior {
    Record,
    Fail(String),
    Panic(String),
}

type UpdateHook<E> = Box<dyn Fn(&[E], &[E]) + Send + Sync>;

/// Consumer view that records every update it receives.
pub struct RecordingView<E> {
    updates: Mutex<Vec<(Vec<E>, Vec<E>)>>,
    behavior: ViewBehavior,
    hook: Option<UpdateHook<E>>,
    observed: Option<Arc<MockStatement>>,
    unlocked_updates: AtomicU64,
}

impl<E> RecordingView<E> {
    fn with_behavior(behavior: ViewBehavior) -> Self {
        Self {
            updates: Mutex::new(Vec::new()),
            behavior,
            hook: None,
            observed: None,
            unlocked_updates: AtomicU64::new(0),
        }
    }

    /// Creates a view that records updates.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::with_behavior(ViewBehavior::Record))
    }

    /// Creates a view whose updates return [`ProcessingError::ConsumerFailed`].
    #[must_use]
    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self::with_behavior(ViewBehavior::Fail(message.to_string())))
    }

    /// Creates a view whose updates panic.
    #[must_use]
    pub fn panicking(message: &str) -> Arc<Self> {
        Arc::new(Self::with_behavior(ViewBehavior::Panic(message.to_string())))
    }

    /// Creates a recording view that checks `statement`'s lock is held
    /// during every update.
    #[must_use]
    pub fn observing(statement: &Arc<MockStatement>) -> Arc<Self> {
        let mut view = Self::with_behavior(ViewBehavior::Record);
        view.observed = Some(Arc::clone(statement));
        Arc::new(view)
    }

    /// Creates a recording view that runs `hook` after recording each
    /// update.
    #[must_use]
    pub fn with_hook<F>(hook: F) -> Arc<Self>
    where
        F: Fn(&[E], &[E]) + Send + Sync + 'static,
    {
        let mut view = Self::with_behavior(ViewBehavior::Record);
        view.hook = Some(Box::new(hook));
        Arc::new(view)
    }

    /// Number of updates received.
    #[must_use]
    pub fn update_count(&self) -> usize {
        self.updates.lock().len()
    }

    /// Returns `true` if no update ran without the observed lock held.
    #[must_use]
    pub fn lock_held_during_updates(&self) -> bool {
        self.unlocked_updates.load(Ordering::SeqCst) == 0
    }
}

impl<E: Clone> RecordingView<E> {
    /// Every update as `(inserted, removed)`, in arrival order.
    #[must_use]
    pub fn updates(&self) -> Vec<(Vec<E>, Vec<E>)> {
        self.updates.lock().clone()
    }

    /// All inserted items across updates, in arrival order.
    #[must_use]
    pub fn inserted(&self) -> Vec<E> {
        self.updates
            .lock()
            .iter()
            .flat_map(|(ins, _)| ins.iter().cloned())
            .collect()
    }

    /// All removed items across updates, in arrival order.
    #[must_use]
    pub fn removed(&self) -> Vec<E> {
        self.updates
            .lock()
            .iter()
            .flat_map(|(_, rem)| rem.iter().cloned())
            .collect()
    }
}

impl<E: Clone + Send + Sync> ConsumerView<E> for RecordingView<E> {
    fn update(&self, inserted: &[E], removed: &[E]) -> Result<(), ProcessingError> {
        if let Some(stmt) = &self.observed {
            if !stmt.lock().is_locked_exclusive() {
                self.unlocked_updates.fetch_add(1, Ordering::SeqCst);
            }
        }
        match &self.behavior {
            ViewBehavior::Record => {}
            ViewBehavior::Fail(msg) => return Err(ProcessingError::ConsumerFailed(msg.clone())),
            ViewBehavior::Panic(msg) => panic!("{msg}"),
        }
        self.updates
            .lock()
            .push((inserted.to_vec(), removed.to_vec()));
        if let Some(hook) = &self.hook {
            hook(inserted, removed);
        }
        Ok(())
    }
}

impl<E> std::fmt::Debug for RecordingView<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingView")
            .field("updates", &self.update_count())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Recording services
// ---------------------------------------------------------------------------

/// One failure reported to a [`RecordingExceptionHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionReport {
    /// Failing statement.
    pub statement: StatementId,
    /// Rendered error.
    pub message: String,
    /// Failure category.
    pub kind: ExceptionKind,
}

/// Exception handler that records every report.
#[derive(Debug, Default)]
pub struct RecordingExceptionHandler {
    reports: Mutex<Vec<ExceptionReport>>,
}

impl RecordingExceptionHandler {
    /// Creates an empty handler.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reports received, in order.
    #[must_use]
    pub fn reports(&self) -> Vec<ExceptionReport> {
        self.reports.lock().clone()
    }

    /// Number of reports received.
    #[must_use]
    pub fn count(&self) -> usize {
        self.reports.lock().len()
    }
}

impl ExceptionHandler for RecordingExceptionHandler {
    fn handle_exception(
        &self,
        error: &ProcessingError,
        statement: &dyn StatementHandle,
        kind: ExceptionKind,
    ) {
        self.reports.lock().push(ExceptionReport {
            statement: statement.id(),
            message: error.to_string(),
            kind,
        });
    }
}

/// One timing sample received by a [`RecordingMetricsSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingSample {
    /// Statement the sample belongs to.
    pub statement_name: String,
    /// Thread CPU time.
    pub cpu: Duration,
    /// Wall-clock time.
    pub wall: Duration,
    /// Executions covered by the sample.
    pub samples: u64,
}

/// Metrics sink that records every sample.
#[derive(Debug, Default)]
pub struct RecordingMetricsSink {
    samples: Mutex<Vec<TimingSample>>,
}

impl RecordingMetricsSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Samples received, in order.
    #[must_use]
    pub fn samples(&self) -> Vec<TimingSample> {
        self.samples.lock().clone()
    }
}

impl MetricsSink for RecordingMetricsSink {
    fn account_time(&self, handle: &MetricsHandle, cpu: Duration, wall: Duration, samples: u64) {
        self.samples.lock().push(TimingSample {
            statement_name: handle.statement_name().to_string(),
            cpu,
            wall,
            samples,
        });
    }
}

/// Variable service that counts snapshot calls.
#[derive(Debug, Default)]
pub struct CountingVariableService {
    calls: AtomicU64,
}

impl CountingVariableService {
    /// Number of `set_local_version` calls.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl VariableService for CountingVariableService {
    fn set_local_version(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Table service that counts lock releases.
#[derive(Debug, Default)]
pub struct CountingTableService {
    calls: AtomicU64,
}

impl CountingTableService {
    /// Number of `release_acquired_locks` calls.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TableService for CountingTableService {
    fn release_acquired_locks(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}
