//! Bounded retry with exponential backoff and a per-attempt timeout.

use crate::payments::error::{PaymentError, PaymentResult};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles after each later one.
    pub base_delay: Duration,
    /// Hard limit for a single attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            attempt_timeout: Duration::from_millis(3000),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based): `base * 2^(attempt-1)`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// Run `operation` until it succeeds or the policy is exhausted.
///
/// Every failure is retried, timeouts included, until `max_attempts` calls
/// have been made. Exhaustion yields [`PaymentError::ProviderUnavailable`]
/// wrapping the last error.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> PaymentResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = PaymentResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        let outcome = match tokio::time::timeout(policy.attempt_timeout, operation(attempt)).await
        {
            Ok(result) => result,
            Err(_) => Err(PaymentError::Timeout {
                timeout_ms: policy.attempt_timeout.as_millis() as u64,
            }),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(err) => {
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    retryable = err.is_retryable(),
                    error = %err,
                    "provider attempt failed"
                );
                last_error = Some(err);
                if attempt < max_attempts {
                    tokio::time::sleep(policy.delay_after(attempt)).await;
                }
            }
        }
    }

    Err(PaymentError::ProviderUnavailable {
        attempts: max_attempts,
        message: last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempt was made".to_string()),
    })
}
