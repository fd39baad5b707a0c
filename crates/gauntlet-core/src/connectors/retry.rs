//! Retry discipline for connector calls.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::errors::{CoreError, CoreResult};

/// How a connector behaves when a call fails with a retryable error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub allow_retries: bool,
    /// Total attempts, first call included.
    pub retries_times: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            allow_retries: true,
            retries_times: 3,
        }
    }
}

impl RetryPolicy {
    fn max_attempts(&self) -> u32 {
        if self.allow_retries {
            self.retries_times.max(1)
        } else {
            1
        }
    }
}

/// Run `call` under the policy. Retryable errors back off exponentially
/// (2^attempt seconds plus up to one second of jitter, capped); a rate-limit
/// response that names a retry-after delay is honored instead. The last
/// failure is returned as-is.
pub async fn with_retries<T, F, Fut>(
    policy: &RetryPolicy,
    connector_id: &str,
    mut call: F,
) -> CoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CoreResult<T>>,
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 0u32;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < max_attempts => {
                attempt += 1;
                let backoff = backoff_for(&e, attempt);
                warn!(
                    connector = connector_id,
                    error = %e,
                    retry = attempt,
                    max_retries = max_attempts - 1,
                    backoff_ms = backoff.as_millis() as u64,
                    "retrying connector call"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn backoff_for(error: &CoreError, attempt: u32) -> Duration {
    if let CoreError::RateLimited {
        retry_after: Some(after),
        ..
    } = error
    {
        let capped = (*after).min(Duration::from_secs(30));
        let jitter_factor: f64 = rand::thread_rng().gen_range(0.9_f64..=1.1_f64);
        let jittered_ms = ((capped.as_millis() as f64) * jitter_factor).round() as u64;
        return Duration::from_millis(jittered_ms.max(100));
    }
    let base = Duration::from_secs(1 << attempt.min(5)).min(Duration::from_secs(30));
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..1000));
    base + jitter
}
