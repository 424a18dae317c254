//! Task-level retry
//!
//! Exponential backoff around one source call. Only errors reported as
//! retryable (rate limit, network, timeout) are retried; everything else
//! fails fast.

use crate::error::SourceError;
use enrich_common::config::RetrySettings;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Run `operation` until it succeeds, fails non-retryably, or attempts run out
///
/// **Backoff:** starts at `initial_backoff_ms`, doubles after every retry,
/// capped at `max_backoff_ms`.
pub async fn retry_source_call<F, Fut, T>(
    operation_name: &str,
    settings: &RetrySettings,
    mut operation: F,
) -> Result<T, SourceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    let start_time = Instant::now();
    let max_attempts = settings.max_attempts.max(1);
    let mut backoff_ms = settings.initial_backoff_ms;
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Source call succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) if attempt >= max_attempts => {
                warn!(
                    operation = operation_name,
                    attempt,
                    error = %err,
                    "Source call failed: retries exhausted"
                );
                return Err(err);
            }
            Err(err) => {
                let delay_ms = backoff_ms.min(settings.max_backoff_ms);
                warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = delay_ms,
                    error = %err,
                    "Retryable source error, backing off"
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                backoff_ms = backoff_ms.saturating_mul(2).min(settings.max_backoff_ms);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_settings(max_attempts: u32) -> RetrySettings {
        RetrySettings {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    #[tokio::test]
    async fn test_succeeds_first_attempt() {
        let result = retry_source_call("test_op", &fast_settings(3), || async {
            Ok::<i32, SourceError>(42)
        })
        .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retries_retryable_errors() {
        let calls = AtomicU32::new(0);
        let result = retry_source_call("test_op", &fast_settings(3), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(SourceError::RateLimited("slow down".to_string()))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let calls = AtomicU32::new(0);
        let result = retry_source_call("test_op", &fast_settings(5), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, _>(SourceError::Api("bad request".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(SourceError::Api(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result = retry_source_call("test_op", &fast_settings(2), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, _>(SourceError::Timeout(100)) }
        })
        .await;

        assert!(matches!(result, Err(SourceError::Timeout(100))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
