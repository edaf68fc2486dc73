//! Retrying provider calls with exponential backoff and cancellation.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{ProviderError, ProviderResult};
use crate::resource::ResourceId;

use super::config::RetryPolicy;

/// Outcome of a retried call: the final result and how many calls were made.
#[derive(Debug)]
pub struct Attempted<T> {
    /// Final result.
    pub result: ProviderResult<T>,
    /// Calls made, including the first.
    pub calls: u32,
}

/// Calls `call` until it succeeds, fails permanently, or the policy is spent.
///
/// Only errors classified as transient are retried. When `cancel` fires,
/// no further call is made and the result is `Cancelled`.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: Option<&CancellationToken>,
    resource: &ResourceId,
    operation: &str,
    mut call: F,
) -> Attempted<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProviderResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut calls = 0u32;

    loop {
        calls += 1;
        let error = match call().await {
            Ok(value) => {
                return Attempted {
                    result: Ok(value),
                    calls,
                };
            }
            Err(e) => e,
        };

        if !error.is_retryable() || calls >= max_attempts {
            return Attempted {
                result: Err(error),
                calls,
            };
        }

        let delay = jittered_delay(policy.base_delay(calls), policy.jitter);
        warn!(
            resource = %resource,
            operation,
            attempt = calls,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %error,
            "Transient failure, retrying"
        );

        if !sleep_unless_cancelled(delay, cancel).await {
            return Attempted {
                result: Err(ProviderError::Cancelled {
                    operation: format!("{operation} {resource}"),
                }),
                calls,
            };
        }
    }
}

/// Sleeps for `delay`, returning false if cancelled first or already.
async fn sleep_unless_cancelled(delay: Duration, cancel: Option<&CancellationToken>) -> bool {
    let Some(token) = cancel else {
        tokio::time::sleep(delay).await;
        return true;
    };
    if token.is_cancelled() {
        return false;
    }
    tokio::select! {
        () = tokio::time::sleep(delay) => true,
        () = token.cancelled() => false,
    }
}

/// Adds jitter to a duration to prevent thundering herd.
fn jittered_delay(base: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 || base.is_zero() {
        return base;
    }
    let jitter = rand::thread_rng().gen_range(0.0..jitter_factor.min(1.0));
    Duration::from_secs_f64(base.as_secs_f64() * (1.0 + jitter))
}
