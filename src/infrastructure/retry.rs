use crate::infrastructure::error::InfraError;
use std::future::Future;
use tokio::time::{sleep, Duration as TokioDuration};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
}

impl RetryPolicy {
    /// Exactly one attempt.
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
        }
    }

    pub fn delay_for_attempt(&self, attempt: u8) -> TokioDuration {
        let delay = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt as u32));
        TokioDuration::from_millis(delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

/// Runs `operation` until it succeeds, fails with a non-transient error, or
/// the policy runs out of attempts. Delays double after every failure.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<T, InfraError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, InfraError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt: u8 = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_transient() && attempt + 1 < max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                tracing::debug!(
                    operation = label,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "retrying store operation"
                );
                sleep(delay).await;
                attempt = attempt.saturating_add(1);
            }
            Err(error) => return Err(error),
        }
    }
}
