//! Classified retry for provider calls.
//!
//! Auth failures and non-429 4xx responses are deterministic and surface
//! immediately; rate limits, timeouts, transport failures and 5xx responses
//! retry with exponential backoff and full jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use crate::providers::ProviderError;

/// Total attempts per call (1 initial + 2 retries).
pub const MAX_ATTEMPTS: u32 = 3;
const BASE_DELAY_MS: u64 = 500;
const MAX_DELAY_MS: u64 = 8_000;

/// Run `call` until it succeeds, fails non-retryably, or exhausts
/// [`MAX_ATTEMPTS`].
pub async fn with_retry<T, F, Fut>(label: &str, call: F) -> Result<T, ProviderError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut last_err = None;
    for attempt in 0..MAX_ATTEMPTS {
        if attempt > 0 {
            let wait = backoff_delay(attempt, last_err.as_ref());
            info!(
                label,
                attempt = attempt + 1,
                max = MAX_ATTEMPTS,
                wait_ms = wait.as_millis() as u64,
                "Retrying provider call"
            );
            tokio::time::sleep(wait).await;
        }
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retryable() {
                    warn!(label, kind = ?err.kind, "Provider call failed (non-retryable): {}", err);
                    return Err(err);
                }
                warn!(label, kind = ?err.kind, "Provider call failed: {}", err);
                last_err = Some(err);
            }
        }
    }
    // last_err is always set once the loop exhausts.
    Err(last_err.unwrap_or_else(|| ProviderError::stream("retry loop exhausted without error")))
}

/// Exponential backoff with full jitter, floored at any server-provided
/// Retry-After hint.
fn backoff_delay(attempt: u32, last_err: Option<&ProviderError>) -> Duration {
    let exp = BASE_DELAY_MS.saturating_mul(2u64.saturating_pow(attempt - 1));
    let capped = exp.min(MAX_DELAY_MS);
    let jittered = rand::thread_rng().gen_range(0..=capped);
    let floor_ms = last_err
        .and_then(|e| e.retry_after_secs)
        .map(|s| s.saturating_mul(1000))
        .unwrap_or(0);
    Duration::from_millis(jittered.max(floor_ms).min(MAX_DELAY_MS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::providers::ProviderErrorKind;

    fn transient() -> ProviderError {
        ProviderError::from_status(503, "try later")
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry("test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(transient())
                } else {
                    Ok("ok")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(transient()) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderError::from_status(401, "bad key")) }
        })
        .await;
        assert_eq!(result.unwrap_err().kind, ProviderErrorKind::Auth);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_cap() {
        for attempt in 1..10 {
            let d = backoff_delay(attempt, None);
            assert!(d <= Duration::from_millis(MAX_DELAY_MS));
        }
    }

    #[test]
    fn test_retry_after_floor() {
        let err = ProviderError::from_status(429, r#"{"retry_after": 3}"#);
        let d = backoff_delay(1, Some(&err));
        assert!(d >= Duration::from_secs(3));
    }
}
