use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Exponential backoff for startup operations such as the first database
/// connection. Pipeline stages never retry.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: usize,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: usize, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            max_backoff: Duration::from_millis(max_backoff_ms),
        }
    }

    /// Backoff before retry number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: usize) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(31) as u32);
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }

    /// Run `f` until it succeeds, retries run out, or it fails with an error
    /// `should_retry` rejects.
    pub async fn retry_when<F, Fut, T, E, P>(
        &self,
        operation: &str,
        mut f: F,
        should_retry: P,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 0;

        loop {
            let e = match f().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(operation, attempts = attempt + 1, "Succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            attempt += 1;
            if !should_retry(&e) {
                warn!(operation, error = %e, "Permanent failure, not retrying");
                return Err(e);
            }
            if attempt > self.max_retries {
                warn!(operation, attempts = attempt, error = %e, "Giving up");
                return Err(e);
            }

            let backoff = self.backoff_for(attempt);
            warn!(
                operation,
                attempt,
                max_retries = self.max_retries,
                backoff_ms = backoff.as_millis() as u64,
                error = %e,
                "Retrying"
            );
            sleep(backoff).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let policy = RetryPolicy::new(5, 100, 350);

        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(350));
        assert_eq!(policy.backoff_for(60), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let policy = RetryPolicy::new(3, 1, 2);
        let calls = AtomicUsize::new(0);

        let result: Result<&str, String> = policy
            .retry_when(
                "connect",
                || async {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("connection refused".to_string())
                    } else {
                        Ok("connected")
                    }
                },
                |_| true,
            )
            .await;

        assert_eq!(result.unwrap(), "connected");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let policy = RetryPolicy::new(2, 1, 1);
        let calls = AtomicUsize::new(0);

        let result: Result<(), String> = policy
            .retry_when(
                "connect",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("connection refused".to_string())
                },
                |_| true,
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let policy = RetryPolicy::new(5, 1, 1);
        let calls = AtomicUsize::new(0);

        let result: Result<(), String> = policy
            .retry_when(
                "connect",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("password authentication failed".to_string())
                },
                |e| !e.contains("authentication"),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
