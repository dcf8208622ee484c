//! Exponential backoff policy shared by the uploader and the orchestrator

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use reboot_common::config::{SubmissionConfig, UploadConfig};

/// Largest exponent applied to the base delay; keeps the multiplication finite
const MAX_EXPONENT: u32 = 16;

/// Retry budget plus delay schedule `base_delay * 2^retry_count`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Delay before retry number `retry_count + 1`
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let factor = 2u32.pow(retry_count.min(MAX_EXPONENT));
        self.base_delay.saturating_mul(factor)
    }

    /// Total attempts, including the first one
    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl From<&SubmissionConfig> for RetryPolicy {
    fn from(config: &SubmissionConfig) -> Self {
        Self::new(config.max_retries, Duration::from_millis(config.base_delay_ms))
    }
}

impl From<&UploadConfig> for RetryPolicy {
    fn from(config: &UploadConfig) -> Self {
        Self::new(
            config.attempts.saturating_sub(1),
            Duration::from_millis(config.base_delay_ms),
        )
    }
}

/// Sleep for `delay` unless `cancel` fires first.
///
/// Returns `false` if cancelled.
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
