//! Bounded retry for upstream list calls.

use log::{debug, warn};
use std::future::Future;
use std::time::Duration;

use crate::error::{AuthzError, AuthzResult};

/// Attempt budget and delay for one upstream call.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    /// Delay after the first failure; grows linearly with the attempt number
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(100),
        }
    }
}

/// Runs `operation` up to `policy.attempts` times.
///
/// Transient errors are retried after a fixed, linearly growing delay.
/// Non-transient errors return immediately. Exhausting the budget yields a
/// single [`AuthzError::RemoteFetch`].
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> AuthzResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AuthzResult<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", operation_name, attempt);
                }
                return Ok(value);
            }
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) if attempt >= attempts => {
                return Err(AuthzError::RemoteFetch {
                    operation: operation_name.to_string(),
                    attempts,
                    message: err.to_string(),
                });
            }
            Err(err) => {
                warn!(
                    "{} failed (attempt {}/{}): {}",
                    operation_name, attempt, attempts, err
                );
                tokio::time::sleep(policy.delay * attempt).await;
            }
        }
    }
}
