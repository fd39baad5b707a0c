//! Per-endpoint call limits: a concurrency semaphore plus a fixed-window
//! token bucket.
//!
//! The bucket holds `max_calls_per_second` tokens and refills at whole
//! second boundaries measured from construction. A caller that finds the
//! bucket empty sleeps until the next boundary, so call *starts* never
//! exceed the configured rate even under a thundering herd.

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep_until, Duration, Instant};

use std::sync::Arc;

use crate::errors::{CoreError, CoreResult};

const WINDOW: Duration = Duration::from_secs(1);

struct Bucket {
    tokens: u32,
    window_start: Instant,
}

/// Combined concurrency and rate limit for one connector.
pub struct RateLimiter {
    semaphore: Arc<Semaphore>,
    bucket: Mutex<Bucket>,
    capacity: u32,
}

impl RateLimiter {
    pub fn new(max_concurrency: u32, max_calls_per_second: u32) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency as usize)),
            bucket: Mutex::new(Bucket {
                tokens: max_calls_per_second,
                window_start: Instant::now(),
            }),
            capacity: max_calls_per_second,
        }
    }

    /// Wait for a concurrency slot and a rate token.
    ///
    /// The returned permit must be held for the duration of the remote call;
    /// dropping it frees the concurrency slot. The rate token is consumed
    /// either way.
    pub async fn acquire(&self) -> CoreResult<OwnedSemaphorePermit> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| CoreError::fatal_run("connector semaphore closed"))?;

        loop {
            let mut bucket = self.bucket.lock().await;
            let elapsed = Instant::now().duration_since(bucket.window_start);
            if elapsed >= WINDOW {
                // Jump to the current window boundary, not to "now", so
                // boundaries stay aligned across the whole run.
                bucket.window_start += Duration::from_secs(elapsed.as_secs());
                bucket.tokens = self.capacity;
            }
            if bucket.tokens > 0 {
                bucket.tokens -= 1;
                return Ok(permit);
            }
            let next_window = bucket.window_start + WINDOW;
            drop(bucket);
            sleep_until(next_window).await;
        }
    }

    /// Concurrency slots currently free.
    pub fn available_concurrency(&self) -> usize {
        self.semaphore.available_permits()
    }
}
