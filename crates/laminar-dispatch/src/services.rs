//! Engine services the apply step calls into.
//!
//! Each service is a narrow hook into a subsystem this crate does not
//! implement: variable snapshots, table lock release, exception reporting
//! and timing. [`EngineServices`] bundles them; its default wires no-op
//! variable/table services, a logging exception handler and a discarding
//! metrics sink.

use std::sync::Arc;

use crate::error::{ExceptionKind, ProcessingError};
use crate::metrics::{MetricsSink, NoopMetricsSink};
use crate::statement::StatementHandle;

/// Variable subsystem hook.
pub trait VariableService: Send + Sync {
    /// Pins the current variable versions for the calling thread, so every
    /// consumer update of one apply step reads the same snapshot.
    fn set_local_version(&self);
}

/// Table subsystem hook.
pub trait TableService: Send + Sync {
    /// Releases table locks acquired indirectly by the calling thread during
    /// the current evaluation.
    fn release_acquired_locks(&self);
}

/// Central exception handler.
///
/// Must not panic: it runs on the cleanup path of the apply step.
pub trait ExceptionHandler: Send + Sync {
    /// Reports a failure raised by `statement`.
    fn handle_exception(
        &self,
        error: &ProcessingError,
        statement: &dyn StatementHandle,
        kind: ExceptionKind,
    );
}

/// Variable service for engines without variables.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopVariableService;

impl VariableService for NoopVariableService {
    fn set_local_version(&self) {}
}

/// Table service for engines without tables.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTableService;

impl TableService for NoopTableService {
    fn release_acquired_locks(&self) {}
}

/// Exception handler that logs failures via `tracing::error!`.
#[derive(Debug, Clone)]
pub struct LoggingExceptionHandler {
    engine_name: Arc<str>,
}

impl LoggingExceptionHandler {
    /// Creates a handler that tags log lines with `engine_name`.
    #[must_use]
    pub fn new(engine_name: impl Into<Arc<str>>) -> Self {
        Self {
            engine_name: engine_name.into(),
        }
    }
}

impl Default for LoggingExceptionHandler {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_ENGINE_NAME)
    }
}

impl ExceptionHandler for LoggingExceptionHandler {
    fn handle_exception(
        &self,
        error: &ProcessingError,
        statement: &dyn StatementHandle,
        kind: ExceptionKind,
    ) {
        tracing::error!(
            engine = %self.engine_name,
            statement = %statement.id(),
            statement_name = statement.name(),
            %kind,
            "Exception encountered processing statement: {error}"
        );
    }
}

/// Services used by the statement apply step.
#[derive(Clone)]
pub struct EngineServices {
    /// Variable snapshot hook.
    pub variables: Arc<dyn VariableService>,
    /// Table lock release hook.
    pub tables: Arc<dyn TableService>,
    /// Receiver of isolated statement failures.
    pub exception_handler: Arc<dyn ExceptionHandler>,
    /// Receiver of per-statement timings.
    pub metrics_sink: Arc<dyn MetricsSink>,
}

impl Default for EngineServices {
    fn default() -> Self {
        Self {
            variables: Arc::new(NoopVariableService),
            tables: Arc::new(NoopTableService),
            exception_handler: Arc::new(LoggingExceptionHandler::default()),
            metrics_sink: Arc::new(NoopMetricsSink),
        }
    }
}

impl EngineServices {
    /// Replaces the variable service.
    #[must_use]
    pub fn with_variables(mut self, variables: Arc<dyn VariableService>) -> Self {
        self.variables = variables;
        self
    }

    /// Replaces the table service.
    #[must_use]
    pub fn with_tables(mut self, tables: Arc<dyn TableService>) -> Self {
        self.tables = tables;
        self
    }

    /// Replaces the exception handler.
    #[must_use]
    pub fn with_exception_handler(mut self, handler: Arc<dyn ExceptionHandler>) -> Self {
        self.exception_handler = handler;
        self
    }

    /// Replaces the metrics sink.
    #[must_use]
    pub fn with_metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics_sink = sink;
        self
    }
}

impl std::fmt::Debug for EngineServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineServices").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CountingTableService, CountingVariableService, MockStatement};

    #[test]
    fn test_logging_handler_does_not_panic() {
        let handler = LoggingExceptionHandler::new("engine-x");
        let stmt = MockStatement::new(1, "failing");
        handler.handle_exception(
            &ProcessingError::ConsumerFailed("bad row".into()),
            stmt.as_ref(),
            ExceptionKind::Process,
        );
    }

    #[test]
    fn test_engine_services_builder() {
        let vars = Arc::new(CountingVariableService::default());
        let tables = Arc::new(CountingTableService::default());
        let services = EngineServices::default()
            .with_variables(vars.clone())
            .with_tables(tables.clone());

        services.variables.set_local_version();
        services.tables.release_acquired_locks();
        services.tables.release_acquired_locks();

        assert_eq!(vars.calls(), 1);
        assert_eq!(tables.calls(), 2);
    }
}
