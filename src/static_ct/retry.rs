// Retry Policy - Deadline-bounded exponential backoff for tile fetches

use super::Result;
use crate::error::SearchError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Wait before the first retry, doubled with each subsequent retry.
const INITIAL_INTERVAL: Duration = Duration::from_millis(100);

/// Retry behavior for tile fetches: exponential backoff capped at
/// `max_interval`, with the attempt count bounded by `max_attempts` and the
/// total time spent across attempts bounded by `timeout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Retry {
    /// Maximum number of times to attempt a request before giving up.
    pub max_attempts: u32,

    /// Maximum time to wait between retries.
    pub max_interval: Duration,

    /// Maximum time to spend on a request, including retries.
    pub timeout: Duration,
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            max_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(5),
        }
    }
}

impl Retry {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts < 1 {
            return Err(SearchError::config("max attempts less than one"));
        }

        if self.max_interval.is_zero() {
            return Err(SearchError::config("max interval less than or equal to zero"));
        }

        if self.timeout.is_zero() {
            return Err(SearchError::config("timeout less than or equal to zero"));
        }

        if self.timeout <= self.max_interval {
            return Err(SearchError::config("timeout less than or equal to max interval"));
        }

        Ok(())
    }

    /// Runs `operation` under this policy, returning the first success or
    /// the last failure once the attempt or time budget is spent.
    /// Cancellation aborts immediately regardless of the remaining budget.
    pub(crate) async fn run<T, F, Fut>(&self, cancel: &CancellationToken, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let deadline = Instant::now() + self.timeout;
        let mut interval = INITIAL_INTERVAL.min(self.max_interval);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let result = tokio::select! {
                biased;

                _ = cancel.cancelled() => return Err(SearchError::Cancelled),
                result = operation() => result,
            };

            let err = match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(SearchError::Cancelled) => return Err(SearchError::Cancelled),
                Err(err) => err,
            };

            // Give up once the next attempt cannot start within budget
            if attempt >= self.max_attempts || Instant::now() + interval >= deadline {
                return Err(SearchError::RetryExhausted {
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            warn!(
                attempt,
                max_attempts = self.max_attempts,
                error = %err,
                wait = ?interval,
                "attempt failed, backing off"
            );

            tokio::select! {
                biased;

                _ = cancel.cancelled() => return Err(SearchError::Cancelled),
                _ = sleep(interval) => {}
            }

            interval = (interval * 2).min(self.max_interval);
        }
    }
}
