use std::{future::Future, time::Duration};

use tokio::time::sleep;

use crate::constants::{BASE_RETRY_DELAY, MAX_ATTEMPTS};

/// Errors that can tell whether another attempt might succeed.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

impl Retryable for crate::model::SyncError {
    fn is_transient(&self) -> bool {
        crate::model::SyncError::is_transient(self)
    }
}

impl Retryable for crate::store::documents::StoreError {
    fn is_transient(&self) -> bool {
        crate::store::documents::StoreError::is_transient(self)
    }
}

impl Retryable for crate::http::client::RequestError {
    fn is_transient(&self) -> bool {
        crate::http::client::RequestError::is_transient(self)
    }
}

/// Bounded exponential backoff: `base`, `2 * base`, `4 * base`, ...
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            base_delay: BASE_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn delay_before(&self, attempt: u32) -> Duration {
        // attempt is 1-based; no delay before the first one
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(2))
    }

    /// Runs `op` until it succeeds, fails with a terminal error, or the
    /// attempt budget runs out. The last error is returned.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    attempt += 1;
                    let delay = self.delay_before(attempt);
                    log::warn!(
                        "{label}: attempt {}/{} failed: {err}; retrying in {:?}",
                        attempt - 1,
                        self.max_attempts,
                        delay
                    );
                    sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
