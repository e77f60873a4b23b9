use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// How the delay between two attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// Every delay equals the initial delay.
    Fixed,
    /// The delay after attempt `i` is `initial_delay * 2^i`.
    Exponential,
}

/// Attempt budget and backoff for a retried remote operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff")]
    pub backoff: BackoffKind,
}

impl RetryConfig {
    pub const DEFAULT_MAX_DELAY_MS: u64 = 128_000;

    /// Retry settings for partition and truncate statements.
    pub fn statement_default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: Self::DEFAULT_MAX_DELAY_MS,
            backoff: BackoffKind::Exponential,
        }
    }

    /// Retry settings for block uploads.
    pub fn write_default() -> Self {
        Self {
            max_attempts: 6,
            initial_delay_ms: 4_000,
            max_delay_ms: Self::DEFAULT_MAX_DELAY_MS,
            backoff: BackoffKind::Exponential,
        }
    }

    /// Validates the retry settings, prefixing field names with `prefix`.
    pub fn validate(&self, prefix: &str) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: format!("{prefix}.max_attempts"),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.initial_delay_ms > self.max_delay_ms {
            return Err(ValidationError::InvalidFieldValue {
                field: format!("{prefix}.initial_delay_ms"),
                constraint: "must be <= max_delay_ms".to_string(),
            });
        }

        Ok(())
    }
}

fn default_max_delay_ms() -> u64 {
    RetryConfig::DEFAULT_MAX_DELAY_MS
}

fn default_backoff() -> BackoffKind {
    BackoffKind::Exponential
}
