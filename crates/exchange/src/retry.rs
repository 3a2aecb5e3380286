use perp_sentinel_core::{ExchangeConfig, ExchangeError, ExchangeResult};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Default first backoff delay.
pub const BASE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Backoff ceiling.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(5);

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Bounded exponential backoff for exchange calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: BASE_RETRY_DELAY,
            max_delay: MAX_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn from_config(config: &ExchangeConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            base_delay: config.base_retry_delay(),
            max_delay: config.max_retry_delay(),
        }
    }

    /// Runs an idempotent call, retrying transient errors.
    ///
    /// # Errors
    ///
    /// Returns the first permanent error, or the last transient one once attempts run out.
    pub async fn run<T, F, Fut>(&self, operation: &str, f: F) -> ExchangeResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ExchangeResult<T>>,
    {
        self.run_when(operation, ExchangeError::is_transient, f).await
    }

    /// Runs a call that must not be duplicated, retrying only explicit rate-limit rejections.
    ///
    /// A timeout or 5xx on an order may mean it was accepted, so those are surfaced.
    ///
    /// # Errors
    ///
    /// See [`RetryPolicy::run`].
    pub async fn run_once_accepted<T, F, Fut>(&self, operation: &str, f: F) -> ExchangeResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ExchangeResult<T>>,
    {
        self.run_when(operation, |e| matches!(e, ExchangeError::RateLimited { .. }), f)
            .await
    }

    async fn run_when<T, F, Fut>(
        &self,
        operation: &str,
        retryable: impl Fn(&ExchangeError) -> bool,
        mut f: F,
    ) -> ExchangeResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ExchangeResult<T>>,
    {
        let mut delay = self.base_delay;
        let mut attempt = 1;

        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if retryable(&e) && attempt < self.max_attempts => {
                    let wait = e
                        .retry_after_ms()
                        .map_or(delay, |ms| delay.max(Duration::from_millis(ms)))
                        .min(self.max_delay);
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        delay_ms = wait.as_millis(),
                        "Exchange call failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    delay = (delay * 2).min(self.max_delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = fast()
            .run("ticker", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ExchangeError::Timeout("slow".to_string()))
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: ExchangeResult<()> = fast()
            .run("ticker", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ExchangeError::api(502, "bad gateway"))
            })
            .await;
        assert_eq!(result, Err(ExchangeError::api(502, "bad gateway")));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_surface_immediately() {
        let calls = AtomicU32::new(0);
        let result: ExchangeResult<()> = fast()
            .run("order", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ExchangeError::InsufficientFunds("margin".to_string()))
            })
            .await;
        assert!(matches!(result, Err(ExchangeError::InsufficientFunds(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn orders_are_not_retried_on_timeout() {
        let calls = AtomicU32::new(0);
        let result: ExchangeResult<()> = fast()
            .run_once_accepted("order", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ExchangeError::Timeout("lost".to_string()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let calls = AtomicU32::new(0);
        let result: ExchangeResult<()> = fast()
            .run_once_accepted("order", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ExchangeError::RateLimited { retry_after_ms: 1 })
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
