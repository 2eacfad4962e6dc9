//! # Consumer Latches
//!
//! Single-use ordering tickets. A [`ConsumerLatch`] carries one
//! [`DeltaRecord`] and its [`RoutingTable`], plus a link to the completion
//! signal of the ticket the same window issued just before it.
//!
//! ```text
//!   window "orders"   LatchFactory
//!                        │ new_latch()      new_latch()      new_latch()
//!                        ▼                  ▼                ▼
//!                    ┌────────┐  pred   ┌────────┐  pred  ┌────────┐
//!                    │ seq 0  │◀────────│ seq 1  │◀───────│ seq 2  │
//!                    └────────┘         └────────┘        └────────┘
//!                     done() ──────────▶ await_predecessor() returns
//! ```
//!
//! The dispatcher calls [`await_predecessor`](ConsumerLatch::await_predecessor)
//! before applying a ticket and [`done`](ConsumerLatch::done) afterwards.
//! Dropping a latch that was never completed completes it, so a successor
//! can never be stranded by an early return or a panic.

mod factory;
mod signal;

pub use factory::LatchFactory;
pub use signal::CompletionSignal;

use std::sync::Arc;
use std::time::Duration;

use crate::config::WaitStrategy;
use crate::delta::DeltaRecord;
use crate::routing::RoutingTable;

/// Outcome of waiting for the predecessor ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredecessorWait {
    /// No predecessor, or it had already completed.
    Ready,
    /// The predecessor was drained into the same dispatch round and sits
    /// earlier in the same snapshot.
    SameRound,
    /// Blocked until the predecessor completed.
    Waited,
    /// Gave up after the configured timeout.
    TimedOut,
}

/// Single-use ordering ticket for one window delta.
pub struct ConsumerLatch<E> {
    delta: DeltaRecord<E>,
    routing: Arc<RoutingTable<E>>,
    signal: Arc<CompletionSignal>,
    predecessor: Option<Arc<CompletionSignal>>,
    window: Arc<str>,
    sequence: u64,
    wait_strategy: WaitStrategy,
    timeout: Option<Duration>,
}

impl<E> ConsumerLatch<E> {
    /// Creates a latch with no predecessor.
    ///
    /// Latches that must be ordered come from a [`LatchFactory`].
    #[must_use]
    pub fn standalone(delta: DeltaRecord<E>, routing: Arc<RoutingTable<E>>) -> Self {
        Self {
            delta,
            routing,
            signal: Arc::new(CompletionSignal::new()),
            predecessor: None,
            window: Arc::from(""),
            sequence: 0,
            wait_strategy: WaitStrategy::default(),
            timeout: None,
        }
    }

    /// The delta this ticket delivers.
    #[must_use]
    pub fn delta(&self) -> &DeltaRecord<E> {
        &self.delta
    }

    /// Statements and consumer views receiving the delta.
    #[must_use]
    pub fn routing(&self) -> &RoutingTable<E> {
        &self.routing
    }

    /// Window that issued this ticket.
    #[must_use]
    pub fn window(&self) -> &str {
        &self.window
    }

    /// Shared handle to the window name.
    #[must_use]
    pub fn window_name(&self) -> &Arc<str> {
        &self.window
    }

    /// Position of this ticket in its window's chain.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// This ticket's completion signal.
    #[must_use]
    pub fn completion(&self) -> &Arc<CompletionSignal> {
        &self.signal
    }

    /// Returns `true` once [`done`](Self::done) was called.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.signal.is_signaled()
    }

    /// Marks this ticket as drained into dispatch round `round`.
    pub(crate) fn join_round(&self, round: u64) {
        self.signal.join_round(round);
    }

    fn shares_round_with(&self, pred: &CompletionSignal) -> bool {
        self.signal
            .round()
            .is_some_and(|round| pred.round() == Some(round))
    }

    /// Returns `true` if [`await_predecessor`](Self::await_predecessor)
    /// would currently block on a ticket outside this ticket's round.
    #[must_use]
    pub fn awaits_outside_round(&self) -> bool {
        self.predecessor
            .as_ref()
            .is_some_and(|pred| !pred.is_signaled() && !self.shares_round_with(pred))
    }

    /// Blocks until every ticket issued before this one by the same window
    /// has completed.
    ///
    /// Returns immediately when the predecessor was drained into the same
    /// dispatch round: it sits earlier in the same snapshot, and in a
    /// coalesced round it only completes once the round ends. A predecessor
    /// still queued anywhere else is waited for, whichever thread issued it.
    pub fn await_predecessor(&self) -> PredecessorWait {
        let Some(pred) = self.predecessor.as_ref() else {
            return PredecessorWait::Ready;
        };
        if pred.is_signaled() {
            return PredecessorWait::Ready;
        }
        if self.shares_round_with(pred) {
            return PredecessorWait::SameRound;
        }
        if pred.wait(self.wait_strategy, self.timeout) {
            PredecessorWait::Waited
        } else {
            tracing::warn!(
                window = %self.window,
                sequence = self.sequence,
                timeout_ms = self
                    .timeout
                    .map_or(0, |t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX)),
                "Timed out waiting for earlier named window delivery, proceeding out of order"
            );
            PredecessorWait::TimedOut
        }
    }

    /// Completes this ticket, releasing its successor. Idempotent.
    pub fn done(&mut self) {
        self.signal.signal();
        self.predecessor = None;
    }
}

impl<E> Drop for ConsumerLatch<E> {
    fn drop(&mut self) {
        self.signal.signal();
    }
}

impl<E> std::fmt::Debug for ConsumerLatch<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerLatch")
            .field("window", &self.window)
            .field("sequence", &self.sequence)
            .field("delta_len", &self.delta.len())
            .field("statements", &self.routing.len())
            .field("done", &self.is_done())
            .finish_non_exhaustive()
    }
}
