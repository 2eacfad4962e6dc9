//! One-shot completion signal linking a ticket to its successor.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::config::{WaitStrategy, SPIN_ITERATIONS_BEFORE_YIELD};

const NO_ROUND: u64 = 0;

/// One-shot completion flag with blocking wait.
///
/// Also records the dispatch round its ticket was drained into: a successor
/// drained into the same round never waits for it (see
/// [`ConsumerLatch::await_predecessor`](super::ConsumerLatch::await_predecessor)).
#[derive(Debug)]
pub struct CompletionSignal {
    done: AtomicBool,
    round: AtomicU64,
    lock: Mutex<()>,
    cond: Condvar,
}

impl CompletionSignal {
    /// Creates an unsignaled signal that belongs to no round yet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
            round: AtomicU64::new(NO_ROUND),
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    /// Dispatch round the ticket was drained into, if any.
    #[must_use]
    pub fn round(&self) -> Option<u64> {
        match self.round.load(Ordering::Acquire) {
            NO_ROUND => None,
            round => Some(round),
        }
    }

    pub(crate) fn join_round(&self, round: u64) {
        self.round.store(round, Ordering::Release);
    }

    /// Returns `true` once [`signal`](Self::signal) was called.
    #[inline]
    #[must_use]
    pub fn is_signaled(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Marks the signal complete and wakes every waiter. Idempotent.
    pub fn signal(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        // Taking the lock orders this notify after any waiter's flag check.
        let _guard = self.lock.lock();
        self.cond.notify_all();
    }

    /// Blocks until signaled or until `timeout` elapses.
    ///
    /// Returns `true` if the signal completed, `false` on timeout.
    pub fn wait(&self, strategy: WaitStrategy, timeout: Option<Duration>) -> bool {
        if self.is_signaled() {
            return true;
        }
        let deadline = timeout.map(|t| Instant::now() + t);
        match strategy {
            WaitStrategy::Spin => self.spin(deadline, false),
            WaitStrategy::SpinYield => self.spin(deadline, true),
            WaitStrategy::Park => self.park(deadline),
        }
    }

    fn spin(&self, deadline: Option<Instant>, yield_after_spin: bool) -> bool {
        let mut iterations: u32 = 0;
        loop {
            if self.is_signaled() {
                return true;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return false;
            }
            if yield_after_spin && iterations >= SPIN_ITERATIONS_BEFORE_YIELD {
                thread::yield_now();
            } else {
                iterations = iterations.saturating_add(1);
                std::hint::spin_loop();
            }
        }
    }

    fn park(&self, deadline: Option<Instant>) -> bool {
        let mut guard = self.lock.lock();
        while !self.is_signaled() {
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut guard, deadline).timed_out() {
                        return self.is_signaled();
                    }
                }
                None => self.cond.wait(&mut guard),
            }
        }
        true
    }
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_signal_is_idempotent() {
        let s = CompletionSignal::new();
        assert!(!s.is_signaled());
        s.signal();
        s.signal();
        assert!(s.is_signaled());
        assert!(s.wait(WaitStrategy::Park, None));
    }

    #[test]
    fn test_round_unset_until_joined() {
        let s = CompletionSignal::new();
        assert_eq!(s.round(), None);
        s.join_round(7);
        assert_eq!(s.round(), Some(7));
    }

    #[test]
    fn test_park_wakes_on_signal_from_other_thread() {
        let s = Arc::new(CompletionSignal::new());
        let s2 = Arc::clone(&s);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            s2.signal();
        });
        assert!(s.wait(WaitStrategy::Park, None));
        handle.join().unwrap();
    }

    #[test]
    fn test_spin_strategies_wake_on_signal() {
        for strategy in [WaitStrategy::Spin, WaitStrategy::SpinYield] {
            let s = Arc::new(CompletionSignal::new());
            let s2 = Arc::clone(&s);
            let handle = thread::spawn(move || {
                thread::sleep(Duration::from_millis(5));
                s2.signal();
            });
            assert!(s.wait(strategy, Some(Duration::from_secs(5))));
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_wait_times_out() {
        let s = CompletionSignal::new();
        let start = Instant::now();
        for strategy in [WaitStrategy::Spin, WaitStrategy::SpinYield, WaitStrategy::Park] {
            assert!(!s.wait(strategy, Some(Duration::from_millis(10))));
        }
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
