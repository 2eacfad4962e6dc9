//! Dispatch and latch configuration types.

use std::time::Duration;

/// Default engine name used in logs and tracing spans.
pub const DEFAULT_ENGINE_NAME: &str = "default";

/// Spin iterations before a [`WaitStrategy::SpinYield`] wait starts yielding.
pub const SPIN_ITERATIONS_BEFORE_YIELD: u32 = 100;

/// How a dispatching thread waits for a causally earlier ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitStrategy {
    /// Spin-loop without yielding (lowest latency, highest CPU).
    Spin,

    /// Spin with occasional thread yields.
    SpinYield,

    /// Park the thread until the predecessor signals (lowest CPU).
    #[default]
    Park,
}

/// Configuration for the consumer latches issued by one window.
#[derive(Debug, Clone)]
pub struct LatchConfig {
    /// Chain each ticket to the previous ticket of the same window.
    ///
    /// When disabled, tickets carry no predecessor and deltas from different
    /// threads may be applied in any order.
    pub preserve_order: bool,

    /// Wait strategy for the predecessor.
    pub wait_strategy: WaitStrategy,

    /// Maximum time to wait for the predecessor, `None` waits indefinitely.
    ///
    /// On timeout the ticket is delivered anyway and a warning is logged.
    pub timeout: Option<Duration>,
}

impl Default for LatchConfig {
    fn default() -> Self {
        Self {
            preserve_order: true,
            wait_strategy: WaitStrategy::Park,
            timeout: None,
        }
    }
}

impl LatchConfig {
    /// Creates a builder for custom configuration.
    #[must_use]
    pub fn builder() -> LatchConfigBuilder {
        LatchConfigBuilder::default()
    }

    /// Configuration that does not chain tickets.
    #[must_use]
    pub fn unordered() -> Self {
        Self {
            preserve_order: false,
            ..Default::default()
        }
    }
}

/// Builder for [`LatchConfig`].
#[derive(Debug, Default)]
pub struct LatchConfigBuilder {
    preserve_order: Option<bool>,
    wait_strategy: Option<WaitStrategy>,
    timeout: Option<Duration>,
}

impl LatchConfigBuilder {
    /// Sets whether tickets are chained.
    #[must_use]
    pub fn preserve_order(mut self, enabled: bool) -> Self {
        self.preserve_order = Some(enabled);
        self
    }

    /// Sets the wait strategy.
    #[must_use]
    pub fn wait_strategy(mut self, strategy: WaitStrategy) -> Self {
        self.wait_strategy = Some(strategy);
        self
    }

    /// Sets the predecessor wait timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> LatchConfig {
        let defaults = LatchConfig::default();
        LatchConfig {
            preserve_order: self.preserve_order.unwrap_or(defaults.preserve_order),
            wait_strategy: self.wait_strategy.unwrap_or(defaults.wait_strategy),
            timeout: self.timeout.or(defaults.timeout),
        }
    }
}

/// Configuration for a [`DispatchService`](crate::dispatch::DispatchService).
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Engine name, attached to logs and spans.
    pub engine_name: String,

    /// Prioritized execution: a preemptive statement stops delivery to the
    /// statements after it for the rest of the round.
    pub prioritized: bool,

    /// Engine-wide switch for per-statement timing.
    ///
    /// A statement is timed only if this is on and its own metrics handle is
    /// enabled.
    pub metrics_reporting: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            engine_name: DEFAULT_ENGINE_NAME.to_string(),
            prioritized: false,
            metrics_reporting: false,
        }
    }
}

impl DispatchConfig {
    /// Creates a builder for custom configuration.
    #[must_use]
    pub fn builder() -> DispatchConfigBuilder {
        DispatchConfigBuilder::default()
    }
}

/// Builder for [`DispatchConfig`].
#[derive(Debug, Default)]
pub struct DispatchConfigBuilder {
    engine_name: Option<String>,
    prioritized: Option<bool>,
    metrics_reporting: Option<bool>,
}

impl DispatchConfigBuilder {
    /// Sets the engine name.
    #[must_use]
    pub fn engine_name(mut self, name: impl Into<String>) -> Self {
        self.engine_name = Some(name.into());
        self
    }

    /// Enables or disables prioritized execution.
    #[must_use]
    pub fn prioritized(mut self, enabled: bool) -> Self {
        self.prioritized = Some(enabled);
        self
    }

    /// Enables or disables per-statement timing.
    #[must_use]
    pub fn metrics_reporting(mut self, enabled: bool) -> Self {
        self.metrics_reporting = Some(enabled);
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> DispatchConfig {
        let defaults = DispatchConfig::default();
        DispatchConfig {
            engine_name: self.engine_name.unwrap_or(defaults.engine_name),
            prioritized: self.prioritized.unwrap_or(defaults.prioritized),
            metrics_reporting: self.metrics_reporting.unwrap_or(defaults.metrics_reporting),
        }
    }
}
