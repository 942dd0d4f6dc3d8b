//! Retry logic for broker publishes
//!
//! Provides exponential backoff retry policy with configurable parameters.

use std::time::Duration;

use shared::PipelineConfig;

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,
    /// Base delay between retries (doubles each attempt)
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    /// Default policy: 5 attempts with delays of 1s, 2s, 4s, 8s
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Build the policy from the configured publish retry parameters
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_attempts: config.publish_max_attempts,
            base_delay: Duration::from_millis(config.publish_base_delay_ms),
            max_delay: Duration::from_millis(config.publish_max_delay_ms),
        }
    }

    /// Calculate delay for given attempt (1-indexed)
    ///
    /// Uses exponential backoff: base_delay * 2^(attempt-1), capped at
    /// max_delay.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1));
        let delay = self.base_delay.saturating_mul(multiplier);
        std::cmp::min(delay, self.max_delay)
    }

    /// Check if another attempt should be made after `attempt` failed
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Execute an async operation with retry logic
///
/// Returns the operation's result, or the last error once the attempt
/// budget is exhausted.
pub async fn execute_with_retry<F, Fut, T, E>(policy: &RetryPolicy, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if policy.should_retry(attempt) {
                    let delay = policy.delay_for_attempt(attempt);

                    tracing::warn!(
                        attempt = attempt,
                        max_attempts = policy.max_attempts,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Retrying after error"
                    );

                    tokio::time::sleep(delay).await;
                } else {
                    tracing::warn!(
                        attempt = attempt,
                        max_attempts = policy.max_attempts,
                        error = %e,
                        "Max retries exceeded"
                    );
                    return Err(e);
                }
            }
        }
    }
}
