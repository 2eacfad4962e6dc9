//! # Named-Window Dispatch
//!
//! Drains a worker's pending tickets in rounds and delivers each ticket's
//! delta to the statements routed in it.
//!
//! ## Round structure
//!
//! ```text
//! dispatch()
//!   loop:
//!     snapshot = queue.drain_snapshot()      ── empty? return
//!     structural lock (read)
//!     ├─ 1 ticket : await ─▶ apply per entry ─▶ done
//!     └─ N tickets: await all ─▶ group by statement ─▶ merge per view
//!                   ─▶ apply once per statement ─▶ done all
//! ```
//!
//! A snapshot of one ticket is delivered entry by entry. A snapshot of
//! several tickets is coalesced: each statement's lock is taken once per
//! round and its consumer views see a single merged delta.
//!
//! Every snapshot is stamped with a round id. A ticket never waits for a
//! predecessor of the same round, which sits earlier in the snapshot. A
//! predecessor queued anywhere else is waited for, whichever thread issued
//! it, so one window's tickets complete in issue order across all queues.
//!
//! A snapshot is cut into batches before any ticket whose predecessor is
//! still pending outside the round. Each batch is delivered and completed
//! before the next one waits, so two workers holding interleaved tickets
//! of one window cannot wait on each other.
//!
//! In prioritized mode a preemptive statement ends the round's delivery:
//! statements after it in iteration order do not receive the round's
//! delta.

mod apply;
mod grouping;
mod queue;

pub use queue::DispatchQueue;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::DispatchConfig;
use crate::delta::DeltaRecord;
use crate::error::DispatchError;
use crate::latch::{ConsumerLatch, LatchFactory, PredecessorWait};
use crate::metrics::DispatcherMetrics;
use crate::routing::RoutingTable;
use crate::services::{EngineServices, LoggingExceptionHandler};
use crate::statement::StatementHandle;

use apply::StatementApplier;
use grouping::{aggregate_by_view, route_views, Grouped, GroupingScratch};

/// Engine-wide structural lock.
///
/// Dispatch rounds hold it in shared mode; adding or removing statements
/// takes it exclusively.
pub type EventProcessingLock = RwLock<()>;

// ---------------------------------------------------------------------------
// DispatchService
// ---------------------------------------------------------------------------

/// Shared dispatch state of one engine.
///
/// Hands out one [`DispatchWorker`] per thread via
/// [`worker`](Self::worker).
pub struct DispatchService {
    config: DispatchConfig,
    services: EngineServices,
    structural_lock: Arc<EventProcessingLock>,
    metrics: Arc<DispatcherMetrics>,
}

impl DispatchService {
    /// Creates a service with default engine services.
    ///
    /// Isolated failures are logged with the configured engine name.
    #[must_use]
    pub fn new(config: DispatchConfig) -> Self {
        let services = EngineServices::default().with_exception_handler(Arc::new(
            LoggingExceptionHandler::new(config.engine_name.as_str()),
        ));
        Self::with_services(config, services)
    }

    /// Creates a service with explicit engine services.
    #[must_use]
    pub fn with_services(config: DispatchConfig, services: EngineServices) -> Self {
        Self {
            config,
            services,
            structural_lock: Arc::new(EventProcessingLock::new(())),
            metrics: Arc::new(DispatcherMetrics::default()),
        }
    }

    /// Shares an existing structural lock instead of a private one.
    #[must_use]
    pub fn with_structural_lock(mut self, lock: Arc<EventProcessingLock>) -> Self {
        self.structural_lock = lock;
        self
    }

    /// Dispatch configuration.
    #[must_use]
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Engine services used by the apply step.
    #[must_use]
    pub fn services(&self) -> &EngineServices {
        &self.services
    }

    /// The engine-wide structural lock.
    #[must_use]
    pub fn structural_lock(&self) -> &Arc<EventProcessingLock> {
        &self.structural_lock
    }

    /// Dispatcher counters, shared by all workers.
    #[must_use]
    pub fn metrics(&self) -> &Arc<DispatcherMetrics> {
        &self.metrics
    }

    /// Creates a worker with its own queue and grouping scratch.
    ///
    /// Workers are meant to be owned by one thread each.
    #[must_use]
    pub fn worker<E>(self: &Arc<Self>) -> DispatchWorker<E> {
        DispatchWorker {
            service: Arc::clone(self),
            queue: DispatchQueue::new(),
            scratch: GroupingScratch::default(),
        }
    }

    fn applier(&self) -> StatementApplier<'_> {
        StatementApplier {
            config: &self.config,
            services: &self.services,
            metrics: &self.metrics,
        }
    }

    fn await_ticket<E>(&self, latch: &ConsumerLatch<E>) {
        if latch.await_predecessor() == PredecessorWait::TimedOut {
            self.metrics.latch_timeouts.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Returns `true` if delivery must stop after `handle`.
    fn preempts(&self, handle: &dyn StatementHandle) -> bool {
        if self.config.prioritized && handle.is_preemptive() {
            self.metrics.preemptions.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(statement = %handle.id(), "Preemptive statement ends delivery");
            true
        } else {
            false
        }
    }

    fn dispatch_single<E>(&self, latch: &mut ConsumerLatch<E>) {
        self.metrics
            .single_ticket_rounds
            .fetch_add(1, Ordering::Relaxed);
        self.await_ticket(latch);

        let applier = self.applier();
        for entry in latch.routing().entries() {
            applier.apply_single(&**entry.handle(), latch.delta(), entry.views());
            if self.preempts(&**entry.handle()) {
                break;
            }
        }
        latch.done();
    }

    fn dispatch_multiple<E: Clone>(
        &self,
        scratch: &mut GroupingScratch,
        snapshot: &mut [ConsumerLatch<E>],
    ) -> Result<(), DispatchError> {
        self.metrics.coalesced_rounds.fetch_add(1, Ordering::Relaxed);
        let round = FinishRound { scratch, snapshot };

        for latch in round.snapshot.iter() {
            self.await_ticket(latch);
        }
        round.scratch.group(&*round.snapshot);

        let applier = self.applier();
        for (handle, grouped) in round.scratch.groups() {
            match grouped {
                Grouped::Single(ticket) => {
                    let latch = &round.snapshot[*ticket];
                    let views = route_views(latch, handle)?;
                    applier.apply_single(&**handle, latch.delta(), views);
                }
                Grouped::Many(tickets) => {
                    let deltas = aggregate_by_view(&*round.snapshot, tickets, handle)?;
                    applier.apply_multiple(&**handle, &deltas);
                }
            }
            if self.preempts(&**handle) {
                break;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for DispatchService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchService")
            .field("config", &self.config)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

/// Completes every ticket of a coalesced round and clears the scratch,
/// whichever way the round ends.
struct FinishRound<'a, E> {
    scratch: &'a mut GroupingScratch,
    snapshot: &'a mut [ConsumerLatch<E>],
}

impl<E> Drop for FinishRound<'_, E> {
    fn drop(&mut self) {
        for latch in self.snapshot.iter_mut() {
            latch.done();
        }
        self.scratch.clear();
    }
}

// ---------------------------------------------------------------------------
// DispatchWorker
// ---------------------------------------------------------------------------

/// Per-thread dispatch state: a ticket queue and a grouping scratch.
///
/// Dropping the worker behaves like [`reset`](Self::reset).
pub struct DispatchWorker<E> {
    service: Arc<DispatchService>,
    queue: DispatchQueue<E>,
    scratch: GroupingScratch,
}

impl<E> DispatchWorker<E> {
    /// Handle to this worker's queue, for producers.
    #[must_use]
    pub fn queue(&self) -> DispatchQueue<E> {
        self.queue.clone()
    }

    /// Appends a ticket to this worker's queue.
    pub fn enqueue(&self, latch: ConsumerLatch<E>) {
        self.queue.enqueue(latch);
    }

    /// Issues the next ticket of `factory`'s window and enqueues it.
    pub fn add_dispatch(
        &self,
        factory: &LatchFactory,
        delta: DeltaRecord<E>,
        routing: Arc<RoutingTable<E>>,
    ) {
        self.queue.enqueue_with(|| factory.new_latch(delta, routing));
    }

    /// Number of tickets waiting for the next round.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// The service this worker belongs to.
    #[must_use]
    pub fn service(&self) -> &Arc<DispatchService> {
        &self.service
    }

    /// Drops pending tickets and clears the grouping scratch.
    ///
    /// Dropped tickets complete without being delivered, so threads waiting
    /// on them are released. Safe to call repeatedly.
    pub fn reset(&mut self) {
        let dropped = self.queue.len();
        self.queue.clear();
        self.scratch.clear();
        if dropped > 0 {
            tracing::debug!(
                engine = %self.service.config.engine_name,
                dropped,
                "Dispatch worker reset with pending tickets"
            );
        }
    }
}

impl<E: Clone> DispatchWorker<E> {
    /// Runs dispatch rounds until the queue stays empty.
    ///
    /// Tickets enqueued while a round runs are delivered by a later round
    /// of the same call. Returns `false` if the queue was empty on entry.
    ///
    /// Statement failures are isolated and reported to the exception
    /// handler; they do not surface here.
    ///
    /// Blocks while an earlier ticket of the same window waits in another
    /// worker's queue. A thread driving several workers must dispatch them
    /// in the order it published into them.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] if grouping finds a ticket whose routing
    /// table lacks a statement it was grouped under. The tickets of the
    /// failed round are still completed.
    pub fn dispatch(&mut self) -> Result<bool, DispatchError> {
        let service = &self.service;
        let mut dispatched = false;
        loop {
            let mut snapshot = self.queue.drain_snapshot();
            if snapshot.is_empty() {
                return Ok(dispatched);
            }
            dispatched = true;

            let _structural = service.structural_lock.read_recursive();
            let _span = tracing::trace_span!(
                "named_window_dispatch",
                engine = %service.config.engine_name,
                tickets = snapshot.len()
            )
            .entered();

            service.metrics.rounds.fetch_add(1, Ordering::Relaxed);
            service
                .metrics
                .tickets_dispatched
                .fetch_add(snapshot.len() as u64, Ordering::Relaxed);

            // A batch ends before a ticket still waiting outside this round,
            // so the tickets ahead of it complete first and two workers
            // never wait on each other.
            for batch in snapshot.chunk_by_mut(|_, next| !next.awaits_outside_round()) {
                if batch.len() == 1 {
                    service.dispatch_single(&mut batch[0]);
                } else {
                    service.dispatch_multiple(&mut self.scratch, batch)?;
                }
            }
        }
    }
}

impl<E> Drop for DispatchWorker<E> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<E> std::fmt::Debug for DispatchWorker<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchWorker")
            .field("pending", &self.queue.len())
            .field("scratch", &self.scratch)
            .finish_non_exhaustive()
    }
}
