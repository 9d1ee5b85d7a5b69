//! Retry policy and the shared exponential backoff law

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential backoff: `min(base * 2^attempt, cap)`.
///
/// `attempt` is zero-based, so attempt 0 waits exactly `base`. Large
/// attempt numbers saturate at `cap` instead of overflowing.
///
/// Both the pool's retry path and the queue consumers' idle backoff use
/// this function, so one law governs every wait in the crate.
///
/// ```
/// use std::time::Duration;
/// use switchyard::reliability::backoff_delay;
///
/// let base = Duration::from_millis(5);
/// let cap = Duration::from_millis(200);
///
/// assert_eq!(backoff_delay(0, base, cap), Duration::from_millis(5));
/// assert_eq!(backoff_delay(3, base, cap), Duration::from_millis(40));
/// assert_eq!(backoff_delay(10, base, cap), cap);
/// ```
pub fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(cap).min(cap)
}

/// Configuration for consistency-sensitive and exhaustion-sensitive retries
///
/// # Example
///
/// ```
/// use switchyard::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential()
///     .with_max_attempts(5)
///     .with_initial_interval(Duration::from_millis(50))
///     .with_max_interval(Duration::from_secs(1));
///
/// // First retry after 50ms, then 100ms, 200ms, 400ms
/// assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial one)
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(with = "duration_millis")]
    pub initial_interval: Duration,

    /// Ceiling for any single delay
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    /// Create an exponential backoff retry policy with sensible defaults
    ///
    /// - 3 max attempts
    /// - 50ms initial interval
    /// - 1 second max interval
    pub fn exponential() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_millis(50),
            max_interval: Duration::from_secs(1),
        }
    }

    /// Create a policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
        }
    }

    /// Set the maximum number of attempts (at least one)
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the initial retry interval
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    /// Set the maximum retry interval
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Delay to wait after the given zero-based failed attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        backoff_delay(attempt, self.initial_interval, self.max_interval)
    }

    /// Check if there are remaining attempts after `current_attempt` tries
    pub fn has_attempts_remaining(&self, current_attempt: u32) -> bool {
        current_attempt < self.max_attempts
    }

    /// Start a fresh retry context for one logical operation
    pub fn context(&self) -> RetryContext {
        RetryContext::new(self)
    }
}

/// What made an attempt fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryTrigger {
    /// No pooled slot became free in time
    Exhausted,

    /// A borrowed connection showed a stale view or failed its liveness check
    Stale,

    /// Any other failure expected to clear up on its own
    Transient,
}

impl std::fmt::Display for RetryTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exhausted => write!(f, "exhausted"),
            Self::Stale => write!(f, "stale"),
            Self::Transient => write!(f, "transient"),
        }
    }
}

/// Per-operation retry state
///
/// Created for one logical operation and discarded once it succeeds or
/// runs out of attempts. The attempt counter only grows until `reset`.
#[derive(Debug, Clone)]
pub struct RetryContext {
    attempt: u32,
    max_attempts: u32,
    base: Duration,
    cap: Duration,
    last_trigger: Option<RetryTrigger>,
}

impl RetryContext {
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempt: 0,
            max_attempts: policy.max_attempts.max(1),
            base: policy.initial_interval,
            cap: policy.max_interval,
            last_trigger: None,
        }
    }

    /// Number of failed attempts recorded so far
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn last_trigger(&self) -> Option<RetryTrigger> {
        self.last_trigger
    }

    /// Delay that the most recent failure asked for (zero before any failure)
    pub fn current_delay(&self) -> Duration {
        match self.attempt {
            0 => Duration::ZERO,
            n => backoff_delay(n - 1, self.base, self.cap),
        }
    }

    /// Record a failed attempt.
    ///
    /// Returns the delay to wait before the next attempt, or `None` when
    /// every attempt has been used.
    pub fn record(&mut self, trigger: RetryTrigger) -> Option<Duration> {
        self.attempt = self.attempt.saturating_add(1);
        self.last_trigger = Some(trigger);

        if self.is_exhausted() {
            None
        } else {
            Some(self.current_delay())
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Start counting from zero again for an independent operation
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.last_trigger = None;
    }
}

/// Serde support for Duration as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_until_cap() {
        let base = Duration::from_millis(5);
        let cap = Duration::from_millis(200);

        let delays: Vec<_> = (0..8).map(|a| backoff_delay(a, base, cap)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(5),
                Duration::from_millis(10),
                Duration::from_millis(20),
                Duration::from_millis(40),
                Duration::from_millis(80),
                Duration::from_millis(160),
                Duration::from_millis(200),
                Duration::from_millis(200),
            ]
        );
    }

    #[test]
    fn test_backoff_saturates_on_huge_attempts() {
        let cap = Duration::from_secs(30);
        assert_eq!(backoff_delay(31, Duration::from_secs(1), cap), cap);
        assert_eq!(backoff_delay(64, Duration::from_secs(1), cap), cap);
        assert_eq!(backoff_delay(u32::MAX, Duration::from_secs(u64::MAX / 2), cap), cap);
    }

    #[test]
    fn test_exponential_defaults() {
        let policy = RetryPolicy::exponential();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_interval, Duration::from_millis(50));
        assert_eq!(policy.max_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_no_retry() {
        let policy = RetryPolicy::no_retry();
        assert_eq!(policy.max_attempts, 1);
        assert!(!policy.has_attempts_remaining(1));

        let mut ctx = policy.context();
        assert_eq!(ctx.record(RetryTrigger::Transient), None);
    }

    #[test]
    fn test_max_attempts_never_zero() {
        let policy = RetryPolicy::exponential().with_max_attempts(0);
        assert_eq!(policy.max_attempts, 1);
    }

    #[test]
    fn test_context_counts_to_max_attempts() {
        let policy = RetryPolicy::exponential()
            .with_max_attempts(3)
            .with_initial_interval(Duration::from_millis(10))
            .with_max_interval(Duration::from_millis(15));
        let mut ctx = policy.context();

        assert_eq!(ctx.current_delay(), Duration::ZERO);
        assert_eq!(ctx.record(RetryTrigger::Stale), Some(Duration::from_millis(10)));
        assert_eq!(ctx.record(RetryTrigger::Stale), Some(Duration::from_millis(15)));
        assert_eq!(ctx.record(RetryTrigger::Exhausted), None);

        assert!(ctx.is_exhausted());
        assert_eq!(ctx.attempt(), 3);
        assert_eq!(ctx.last_trigger(), Some(RetryTrigger::Exhausted));
    }

    #[test]
    fn test_context_reset() {
        let mut ctx = RetryPolicy::exponential().context();
        ctx.record(RetryTrigger::Transient);
        ctx.record(RetryTrigger::Transient);

        ctx.reset();
        assert_eq!(ctx.attempt(), 0);
        assert_eq!(ctx.last_trigger(), None);
        assert_eq!(ctx.current_delay(), Duration::ZERO);
    }

    #[test]
    fn test_serialization() {
        let policy = RetryPolicy::exponential().with_max_attempts(7);

        let json = serde_json::to_value(&policy).unwrap();
        assert_eq!(json["initial_interval"], 50);

        let parsed: RetryPolicy = serde_json::from_value(json).unwrap();
        assert_eq!(policy, parsed);
    }
}
