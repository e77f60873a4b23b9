//! Shared configuration types.

mod maxcompute;
mod retry;
mod validation;

pub use maxcompute::{MaxComputeConfig, MaxComputeConfigWithoutSecrets};
pub use retry::{BackoffKind, RetryConfig};
pub use validation::ValidationError;
