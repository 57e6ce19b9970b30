//! Bounded exponential-backoff retry for fallible async operations.
//!
//! One combinator used identically for every provider sync call, so retry
//! behavior is uniform across integrations instead of re-implemented per
//! provider.

use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;

/// Errors opt in to retry by classifying themselves.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for crate::error::ProviderError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Ceiling on a single backoff sleep.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            ..Self::default()
        }
    }
}

/// Final failure of a retried operation, with the attempt count that was spent.
#[derive(Debug, Clone)]
pub struct RetryError<E> {
    pub attempts: u32,
    pub cause: E,
}

/// Delay before the retry following 0-based `attempt`: `base * 2^attempt`.
fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt);
    policy
        .base_delay
        .saturating_mul(factor)
        .min(policy.max_delay)
}

/// Run `operation` up to `policy.max_attempts` times.
///
/// Transient failures sleep `base_delay * 2^attempt` between attempts; the
/// last attempt fails fast with no sleep. Non-retryable errors short-circuit
/// immediately. Every retry is logged with the attempt index and wait.
pub async fn run<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(cause) => {
                let spent = attempt + 1;
                if !cause.is_retryable() {
                    log::warn!("{}: permanent error, not retrying: {}", label, cause);
                    return Err(RetryError {
                        attempts: spent,
                        cause,
                    });
                }
                if spent >= max_attempts {
                    log::error!("{} failed after {} attempt(s): {}", label, spent, cause);
                    return Err(RetryError {
                        attempts: spent,
                        cause,
                    });
                }

                let delay = backoff_delay(policy, attempt);
                log::warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    label,
                    spent,
                    max_attempts,
                    delay,
                    cause
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
