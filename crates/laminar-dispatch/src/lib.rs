//! # `LaminarDB` Named-Window Dispatch
//!
//! Delivery core for named windows: takes the change batches ("deltas") a
//! shared window produces and fans them out to every statement consumer
//! registered against that window.
//!
//! This crate provides:
//! - **Deltas**: immutable insert/remove batches with order-preserving merge
//! - **Consumer latches**: single-use ordering tickets chained per window so
//!   that deltas are applied in production order across threads
//! - **Dispatch workers**: per-thread queues drained in rounds, with a
//!   single-ticket fast path and a coalescing multi-ticket path
//! - **Statement apply step**: applies deltas under the statement's exclusive
//!   lock, isolating consumer failures and reporting timings
//! - **Window tails**: per-window consumer registration and ticket publishing
//!
//! ## Architecture
//!
//! ```text
//!  Producer thread                     Dispatch round (owning worker, later)
//! ┌────────────────┐  publish   ┌──────────────┐  drain   ┌────────────────────┐
//! │  WindowTail    │──────────▶│ DispatchQueue│────────▶│ DispatchWorker     │
//! │  LatchFactory  │  (ticket)  └──────────────┘          │  1 ticket: direct  │
//! └────────────────┘                                      │  N tickets: group  │
//!         ▲                                               │   by statement,    │
//!         │ done() unblocks the next ticket in the chain  │   merge per view   │
//!         └───────────────────────────────────────────────┴────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use laminar_dispatch::{
//!     DeltaRecord, DispatchConfig, DispatchService, LatchConfig, WindowTail,
//! };
//! use laminar_dispatch::testing::{MockStatement, RecordingView};
//!
//! let service = Arc::new(DispatchService::new(DispatchConfig::default()));
//! let mut worker = service.worker::<i64>();
//!
//! let tail = WindowTail::<i64>::new("orders_window", LatchConfig::default(), service.config());
//! let statement = MockStatement::new(1, "select_orders");
//! let view = RecordingView::<i64>::new();
//! tail.add_consumer(statement, view.clone());
//!
//! tail.publish(&worker.queue(), DeltaRecord::insert_only(vec![1, 2, 3]));
//! assert!(worker.dispatch().unwrap());
//! assert_eq!(view.inserted(), vec![1, 2, 3]);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)] // Allowed only for the thread CPU clock in `metrics`
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod delta;
pub mod dispatch;
pub mod error;
pub mod latch;
pub mod metrics;
pub mod routing;
pub mod services;
pub mod statement;
pub mod tail;
pub mod testing;

// Re-export key types
pub use config::{DispatchConfig, LatchConfig, WaitStrategy};
pub use delta::DeltaRecord;
pub use dispatch::{DispatchQueue, DispatchService, DispatchWorker, EventProcessingLock};
pub use error::{DispatchError, ExceptionKind, ProcessingError};
pub use latch::{CompletionSignal, ConsumerLatch, LatchFactory, PredecessorWait};
pub use metrics::{DispatcherMetrics, MetricsHandle, MetricsSink};
pub use routing::{RouteEntry, RoutingTable};
pub use services::{EngineServices, ExceptionHandler, TableService, VariableService};
pub use statement::{ConsumerView, StatementHandle, StatementId, StatementLock};
pub use tail::WindowTail;

/// Result type for laminar-dispatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for laminar-dispatch
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Structural dispatch failure
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Isolated statement processing failure
    #[error("Processing error: {0}")]
    Processing(#[from] ProcessingError),
}
