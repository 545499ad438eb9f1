//! Retry and polling policies for remote pool calls.

use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

/// Bounded retry with a fixed delay between attempts, for order submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Runs `operation` until it succeeds or the attempt budget is spent.
    /// Returns the last error and the number of attempts made.
    pub async fn run<F, Fut, T, E>(&self, operation_name: &str, mut operation: F) -> Result<T, (E, u32)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.max_attempts => {
                    error!(
                        operation = %operation_name,
                        attempt,
                        error = %e,
                        "remote call failed, retry budget exhausted"
                    );
                    return Err((e, attempt));
                }
                Err(e) => {
                    let delay = self.delay;
                    warn!(
                        operation = %operation_name,
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "remote call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Fixed-interval polling bounded by a wall-clock deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub deadline: Duration,
}
