//! Orchestrator settings.

use std::time::Duration;

/// Default number of nodes worked on at once.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Default provider calls per phase before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default timeout for readiness and deletion convergence.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(300);

/// Default bound on a whole create run.
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Retry policy for transient provider failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Calls per phase, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Cap for exponential growth.
    pub max_backoff: Duration,
    /// Growth factor between retries.
    pub multiplier: f64,
    /// Jitter factor (0.0 - 1.0) added on top of each delay.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(20),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy that retries without waiting.
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
            jitter: 0.0,
        }
    }

    /// Returns the un-jittered delay before retry number `retry` (1-based).
    #[must_use]
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.multiplier.max(1.0).powi(exponent);
        let secs = self.initial_backoff.as_secs_f64() * factor;
        let capped = secs.min(self.max_backoff.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_backoff)
    }
}

/// Orchestrator settings, passed in at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Nodes worked on at once.
    pub max_concurrency: usize,
    /// Retry policy for every provider call.
    pub retry: RetryPolicy,
    /// Timeout handed to `wait_until_ready`.
    pub ready_timeout: Duration,
    /// Timeout handed to `wait_until_gone`.
    pub gone_timeout: Duration,
    /// Bound on dispatching work in a run; `None` disables it.
    pub run_timeout: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            retry: RetryPolicy::default(),
            ready_timeout: DEFAULT_WAIT_TIMEOUT,
            gone_timeout: DEFAULT_WAIT_TIMEOUT,
            run_timeout: Some(DEFAULT_RUN_TIMEOUT),
        }
    }
}

impl OrchestratorConfig {
    /// Sets the concurrency limit (at least 1).
    #[must_use]
    pub fn with_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets both wait timeouts.
    #[must_use]
    pub const fn with_wait_timeouts(mut self, ready: Duration, gone: Duration) -> Self {
        self.ready_timeout = ready;
        self.gone_timeout = gone;
        self
    }

    /// Sets the run timeout.
    #[must_use]
    pub const fn with_run_timeout(mut self, run_timeout: Option<Duration>) -> Self {
        self.run_timeout = run_timeout;
        self
    }
}
