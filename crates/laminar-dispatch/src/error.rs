//! Error types for named-window dispatch.
//!
//! Two failure classes exist:
//!
//! - [`ProcessingError`]: raised while one statement applies a delta. It is
//!   caught at the statement boundary, reported to the
//!   [`ExceptionHandler`](crate::services::ExceptionHandler) and suppressed.
//! - [`DispatchError`]: a broken invariant in the dispatch core itself. It is
//!   returned from [`DispatchWorker::dispatch`](crate::dispatch::DispatchWorker::dispatch).

use std::sync::Arc;

use crate::statement::StatementId;

/// Failure raised by a statement while applying a delta.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    /// A consumer view rejected the update
    #[error("Consumer update failed: {0}")]
    ConsumerFailed(String),

    /// The statement's internal (join/subquery) dispatch failed
    #[error("Internal dispatch failed: {0}")]
    InternalDispatchFailed(String),

    /// A consumer view or dispatch hook panicked
    #[error("Statement panicked: {0}")]
    Panicked(String),

    /// Any other statement-level error
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl ProcessingError {
    /// Creates a [`ProcessingError::Panicked`] from a caught panic payload.
    #[must_use]
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::Panicked(msg)
    }
}

/// Structural failure of a dispatch round.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Grouping referenced a statement missing from the ticket's routing table
    #[error("No route to statement {statement} in ticket {sequence} of window '{window}'")]
    MissingRoute {
        /// Statement the round tried to deliver to
        statement: StatementId,
        /// Window that produced the ticket
        window: Arc<str>,
        /// Sequence number of the ticket
        sequence: u64,
    },
}

/// Category attached to failures forwarded to the exception handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    /// Failure while processing delivered data
    Process,
    /// Failure while stopping a statement
    Stop,
}

impl std::fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Process => write!(f, "process"),
            Self::Stop => write!(f, "stop"),
        }
    }
}
