//! Bounded, classified retry with deterministic exponential backoff.
//!
//! An operation is attempted once and retried up to `retry_count` more times
//! while the retry predicate accepts the error. Before each retry the policy
//! waits for the upstream `Retry-After` hint when present, otherwise
//! `base_delay * 2^attempt_index`. No jitter is added.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{RpcError, RETRYABLE_STATUSES};

/// Decides whether an error is worth another attempt.
pub type ShouldRetryFn = Arc<dyn Fn(&RpcError) -> bool + Send + Sync>;

/// Computes the wait before retry `attempt_index` (0-based).
pub type RetryDelayFn = Arc<dyn Fn(u32, &RpcError) -> Duration + Send + Sync>;

/// Delay strategy between attempts.
#[derive(Clone)]
pub enum RetryDelay {
    /// `base * 2^attempt_index`.
    Exponential(Duration),
    /// The same wait before every retry.
    Fixed(Duration),
    /// Caller-supplied function. `Retry-After` hints are not applied.
    Custom(RetryDelayFn),
}

impl std::fmt::Debug for RetryDelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exponential(base) => f.debug_tuple("Exponential").field(base).finish(),
            Self::Fixed(delay) => f.debug_tuple("Fixed").field(delay).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Configuration for the retry policy.
#[derive(Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not counting the first try).
    pub retry_count: u32,
    pub delay: RetryDelay,
    /// Overrides [`default_should_retry`] when set.
    pub should_retry: Option<ShouldRetryFn>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_count: 3,
            delay: RetryDelay::Exponential(Duration::from_millis(150)),
            should_retry: None,
        }
    }
}

impl std::fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryConfig")
            .field("retry_count", &self.retry_count)
            .field("delay", &self.delay)
            .field("custom_should_retry", &self.should_retry.is_some())
            .finish()
    }
}

/// Default retry predicate.
///
/// Retries rate limiting, transient internal errors (code `-1`), timeouts,
/// connection failures and the transient HTTP statuses in
/// [`RETRYABLE_STATUSES`]. Wallet-interaction errors are never retried.
pub fn default_should_retry(err: &RpcError) -> bool {
    if err.is_wallet_error() {
        return false;
    }
    match err {
        RpcError::LimitExceeded(_) => true,
        RpcError::InternalError(p) => p.code == -1,
        RpcError::HttpRequestError { status: None, .. } => true,
        RpcError::HttpRequestError {
            status: Some(status),
            ..
        } => RETRYABLE_STATUSES.contains(status),
        RpcError::TimeoutError { .. } => true,
        _ => false,
    }
}

/// Retry policy — computes delays and drives retried operations.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Wait before retry number `attempt_index` (0 for the first retry).
    pub fn next_delay(&self, attempt_index: u32, err: &RpcError) -> Duration {
        let hinted = err.retry_after().map(Duration::from_secs);
        match &self.config.delay {
            RetryDelay::Custom(f) => f(attempt_index, err),
            RetryDelay::Fixed(delay) => hinted.unwrap_or(*delay),
            RetryDelay::Exponential(base) => hinted.unwrap_or_else(|| {
                let factor = 1u32.checked_shl(attempt_index).unwrap_or(u32::MAX);
                base.saturating_mul(factor)
            }),
        }
    }

    /// Returns `true` if `err`, raised by attempt number `attempt` (1-based),
    /// should be retried.
    pub fn should_retry(&self, attempt: u32, err: &RpcError) -> bool {
        if attempt > self.config.retry_count {
            return false;
        }
        match &self.config.should_retry {
            Some(f) => f(err),
            None => default_should_retry(err),
        }
    }

    /// Run `operation`, retrying classified failures.
    ///
    /// Makes at most `retry_count + 1` attempts and returns the last error
    /// once retries are exhausted or the predicate declines.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, RpcError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if self.should_retry(attempt, &e) => {
                    let delay = self.next_delay(attempt - 1, &e);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying request"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if attempt > 1 {
                        tracing::error!(attempt, error = %e, "giving up after retries");
                    }
                    return Err(e);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::JsonRpcError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn rpc(code: i64) -> RpcError {
        RpcError::from_payload(JsonRpcError {
            code,
            message: "x".into(),
            data: None,
        })
    }

    fn policy(retry_count: u32, base_ms: u64) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            retry_count,
            delay: RetryDelay::Exponential(Duration::from_millis(base_ms)),
            should_retry: None,
        })
    }

    #[test]
    fn exponential_delay_doubles() {
        let p = policy(5, 100);
        let err = rpc(-32005);
        assert_eq!(p.next_delay(0, &err), Duration::from_millis(100));
        assert_eq!(p.next_delay(1, &err), Duration::from_millis(200));
        assert_eq!(p.next_delay(2, &err), Duration::from_millis(400));
        assert_eq!(p.next_delay(3, &err), Duration::from_millis(800));
    }

    #[test]
    fn retry_after_overrides_backoff() {
        let p = policy(5, 100);
        let err = RpcError::http("https://a", Some(429), "slow down", Some(7));
        assert_eq!(p.next_delay(0, &err), Duration::from_secs(7));
        assert_eq!(p.next_delay(4, &err), Duration::from_secs(7));
    }

    #[test]
    fn huge_attempt_index_saturates() {
        let p = policy(100, 100);
        let d = p.next_delay(64, &rpc(-32005));
        assert!(d >= Duration::from_secs(1_000));
    }

    #[test]
    fn default_predicate() {
        assert!(default_should_retry(&rpc(-32005)));
        assert!(default_should_retry(&rpc(-1)));
        assert!(!default_should_retry(&rpc(-32603)));
        assert!(!default_should_retry(&rpc(-32601)));
        assert!(!default_should_retry(&rpc(4001)));
        assert!(!default_should_retry(&rpc(5000)));
        for status in RETRYABLE_STATUSES {
            assert!(default_should_retry(&RpcError::http("u", Some(*status), "", None)));
        }
        assert!(!default_should_retry(&RpcError::http("u", Some(404), "", None)));
        assert!(default_should_retry(&RpcError::timeout("u", Duration::from_secs(1))));
    }

    #[test]
    fn should_retry_boundary() {
        let p = policy(2, 10);
        let err = rpc(-32005);
        assert!(p.should_retry(1, &err));
        assert!(p.should_retry(2, &err));
        assert!(!p.should_retry(3, &err));
    }

    #[tokio::test(start_paused = true)]
    async fn makes_exactly_n_plus_one_attempts() {
        let p = policy(4, 10);
        let attempts = AtomicU32::new(0);
        let result: Result<(), RpcError> = p
            .run(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(rpc(-32005)) }
            })
            .await;
        assert!(matches!(result, Err(RpcError::LimitExceeded(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_means_one_attempt() {
        let p = policy(0, 10);
        let attempts = AtomicU32::new(0);
        let _ = p
            .run(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(rpc(-32005)) }
            })
            .await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn user_rejection_is_not_retried() {
        let p = policy(3, 10);
        let attempts = AtomicU32::new(0);
        let result = p
            .run(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(rpc(4001)) }
            })
            .await;
        assert!(matches!(result, Err(RpcError::UserRejected(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_timing_is_exact() {
        let p = policy(3, 100);
        let start = tokio::time::Instant::now();
        let _ = p.run(|| async { Err::<(), _>(rpc(-32005)) }).await;
        // 100 + 200 + 400
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(700), "elapsed={elapsed:?}");
        assert!(elapsed < Duration::from_millis(750), "elapsed={elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn honors_retry_after_hint() {
        let p = policy(1, 10);
        let attempts = AtomicU32::new(0);
        let start = tokio::time::Instant::now();
        let result = p
            .run(|| {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(RpcError::http("u", Some(429), "", Some(2)))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 1);
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn custom_predicate_and_delay() {
        let p = RetryPolicy::new(RetryConfig {
            retry_count: 2,
            delay: RetryDelay::Custom(Arc::new(|_, _| Duration::from_millis(5))),
            should_retry: Some(Arc::new(|e| matches!(e, RpcError::MethodNotFound(_)))),
        });
        let attempts = AtomicU32::new(0);
        let start = tokio::time::Instant::now();
        let _ = p
            .run(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(rpc(-32601)) }
            })
            .await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(10) && elapsed < Duration::from_millis(50));
    }
}
