//! Bounded retry timing shared by statement execution and block uploads.

use std::time::Duration;

use etl_config::shared::RetryConfig;
pub use etl_config::shared::BackoffKind;

/// Upper bound applied to every computed delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(128);

/// Attempt budget and delay schedule for a retried remote operation.
///
/// `max_attempts` counts every attempt including the first, so a policy with `max_attempts = 3`
/// performs at most two sleeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff: BackoffKind,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, base_delay: Duration, backoff: BackoffKind) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }

    /// Policy used for DDL statements: three attempts, one second base, exponential.
    pub const fn statement_default() -> Self {
        Self::new(3, Duration::from_secs(1), BackoffKind::Exponential)
    }

    /// Policy used for block uploads: six attempts, four seconds base, exponential.
    pub const fn write_default() -> Self {
        Self::new(6, Duration::from_secs(4), BackoffKind::Exponential)
    }

    /// Returns the delay to wait after the failed attempt with zero-based index `attempt`.
    ///
    /// Exponential delays are `base * 2^attempt`, saturating on overflow. Every delay is capped at
    /// `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = match self.backoff {
            BackoffKind::Fixed => self.base_delay,
            BackoffKind::Exponential => {
                let factor = 1u32 << attempt.min(31);
                self.base_delay.saturating_mul(factor)
            }
        };

        delay.min(self.max_delay)
    }

    /// Returns `true` when another attempt may follow the attempt with zero-based index `attempt`.
    pub fn has_attempts_left(&self, attempt: u32) -> bool {
        attempt.saturating_add(1) < self.max_attempts
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.initial_delay_ms),
            backoff: config.backoff,
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}
