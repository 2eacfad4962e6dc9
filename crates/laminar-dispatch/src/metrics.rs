//! Dispatch metrics: per-statement timing and dispatcher counters.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// MetricsHandle
// ---------------------------------------------------------------------------

/// Per-statement timing handle.
///
/// Reporting can be switched on and off at runtime without touching the
/// statement.
#[derive(Debug)]
pub struct MetricsHandle {
    statement_name: Arc<str>,
    enabled: AtomicBool,
}

impl MetricsHandle {
    /// Creates a handle for the named statement.
    #[must_use]
    pub fn new(statement_name: impl Into<Arc<str>>, enabled: bool) -> Self {
        Self {
            statement_name: statement_name.into(),
            enabled: AtomicBool::new(enabled),
        }
    }

    /// Name of the statement this handle reports for.
    #[must_use]
    pub fn statement_name(&self) -> &str {
        &self.statement_name
    }

    /// Returns `true` if timing is reported for this statement.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Enables or disables timing for this statement.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// MetricsSink
// ---------------------------------------------------------------------------

/// Receives per-statement timing samples.
pub trait MetricsSink: Send + Sync {
    /// Accounts `samples` executions that took `cpu` thread CPU time and
    /// `wall` wall-clock time.
    fn account_time(&self, handle: &MetricsHandle, cpu: Duration, wall: Duration, samples: u64);
}

/// Sink that discards all samples.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn account_time(&self, _handle: &MetricsHandle, _cpu: Duration, _wall: Duration, _samples: u64) {}
}

// ---------------------------------------------------------------------------
// StatementTimer
// ---------------------------------------------------------------------------

/// Measures wall-clock and thread CPU time of one apply step.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StatementTimer {
    wall_start: Instant,
    cpu_start: Duration,
}

impl StatementTimer {
    pub(crate) fn start() -> Self {
        Self {
            cpu_start: thread_cpu_time(),
            wall_start: Instant::now(),
        }
    }

    /// Returns `(cpu, wall)` elapsed since [`start`](Self::start).
    pub(crate) fn stop(self) -> (Duration, Duration) {
        let wall = self.wall_start.elapsed();
        let cpu = thread_cpu_time().saturating_sub(self.cpu_start);
        (cpu, wall)
    }
}

/// CPU time consumed by the calling thread.
#[cfg(any(target_os = "linux", target_os = "macos"))]
#[must_use]
pub fn thread_cpu_time() -> Duration {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid, writable timespec and CLOCK_THREAD_CPUTIME_ID
    // is supported on Linux and macOS.
    #[allow(unsafe_code)]
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_THREAD_CPUTIME_ID, &mut ts) };
    if rc != 0 {
        return Duration::ZERO;
    }
    let secs = u64::try_from(ts.tv_sec).unwrap_or(0);
    let nanos = u32::try_from(ts.tv_nsec).unwrap_or(0);
    Duration::new(secs, nanos)
}

/// CPU time consumed by the calling thread (unsupported platform: zero).
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
#[must_use]
pub fn thread_cpu_time() -> Duration {
    Duration::ZERO
}

// ---------------------------------------------------------------------------
// DispatcherMetrics
// ---------------------------------------------------------------------------

/// Atomic counters for monitoring named-window dispatch.
///
/// Shared by every worker of a [`DispatchService`](crate::dispatch::DispatchService).
#[derive(Debug, Default)]
pub struct DispatcherMetrics {
    /// Total dispatch rounds (non-empty snapshots).
    pub rounds: AtomicU64,
    /// Total tickets processed.
    pub tickets_dispatched: AtomicU64,
    /// Batches handled by the single-ticket path.
    pub single_ticket_rounds: AtomicU64,
    /// Batches handled by the coalescing path.
    pub coalesced_rounds: AtomicU64,
    /// Statement apply steps executed.
    pub statements_applied: AtomicU64,
    /// Apply steps that reported a failure.
    pub statement_failures: AtomicU64,
    /// Rounds cut short by a preemptive statement.
    pub preemptions: AtomicU64,
    /// Predecessor waits that hit the latch timeout.
    pub latch_timeouts: AtomicU64,
}

impl DispatcherMetrics {
    /// Returns total dispatch rounds.
    #[must_use]
    pub fn rounds(&self) -> u64 {
        self.rounds.load(Ordering::Relaxed)
    }

    /// Returns total tickets processed.
    #[must_use]
    pub fn tickets_dispatched(&self) -> u64 {
        self.tickets_dispatched.load(Ordering::Relaxed)
    }

    /// Returns batches handled by the single-ticket path.
    #[must_use]
    pub fn single_ticket_rounds(&self) -> u64 {
        self.single_ticket_rounds.load(Ordering::Relaxed)
    }

    /// Returns batches handled by the coalescing path.
    #[must_use]
    pub fn coalesced_rounds(&self) -> u64 {
        self.coalesced_rounds.load(Ordering::Relaxed)
    }

    /// Returns statement apply steps executed.
    #[must_use]
    pub fn statements_applied(&self) -> u64 {
        self.statements_applied.load(Ordering::Relaxed)
    }

    /// Returns apply steps that reported a failure.
    #[must_use]
    pub fn statement_failures(&self) -> u64 {
        self.statement_failures.load(Ordering::Relaxed)
    }

    /// Returns rounds cut short by a preemptive statement.
    #[must_use]
    pub fn preemptions(&self) -> u64 {
        self.preemptions.load(Ordering::Relaxed)
    }

    /// Returns predecessor waits that hit the latch timeout.
    #[must_use]
    pub fn latch_timeouts(&self) -> u64 {
        self.latch_timeouts.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_handle_toggle() {
        let h = MetricsHandle::new("stmt_a", false);
        assert_eq!(h.statement_name(), "stmt_a");
        assert!(!h.is_enabled());
        h.set_enabled(true);
        assert!(h.is_enabled());
    }

    #[test]
    fn test_timer_measures_wall_time() {
        let timer = StatementTimer::start();
        std::thread::sleep(Duration::from_millis(5));
        let (_cpu, wall) = timer.stop();
        assert!(wall >= Duration::from_millis(5));
    }

    #[cfg(any(target_os = "linux", target_os = "macos"))]
    #[test]
    fn test_thread_cpu_time_advances() {
        let before = thread_cpu_time();
        let mut acc = 0_u64;
        for i in 0..2_000_000_u64 {
            acc = acc.wrapping_add(i * i);
        }
        std::hint::black_box(acc);
        assert!(thread_cpu_time() >= before);
    }

    #[test]
    fn test_dispatcher_metrics_default() {
        let m = DispatcherMetrics::default();
        assert_eq!(m.rounds(), 0);
        assert_eq!(m.tickets_dispatched(), 0);
        assert_eq!(m.single_ticket_rounds(), 0);
        assert_eq!(m.coalesced_rounds(), 0);
        assert_eq!(m.statements_applied(), 0);
        assert_eq!(m.statement_failures(), 0);
        assert_eq!(m.preemptions(), 0);
        assert_eq!(m.latch_timeouts(), 0);
    }
}
