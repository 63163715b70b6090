//! Exponential back-off with optional jitter for fallible async operations.

use crate::payments::error::PaymentError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Provider error codes that indicate a transient condition even when the
/// HTTP status alone would not.
pub const TRANSIENT_ERROR_CODES: &[&str] = &[
    "ETIMEDOUT",
    "ECONNRESET",
    "ECONNREFUSED",
    "EAI_AGAIN",
    "INTERNAL_SERVER_ERROR",
    "RATE_LIMIT_REACHED",
];

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// Multiply each delay by a uniform factor in `[0.5, 1.0]`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            factor: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn from_env(prefix: &str) -> Self {
        let defaults = Self::default();
        let var = |name: &str| std::env::var(format!("{}_{}", prefix, name)).ok();
        Self {
            max_retries: var("MAX_RETRIES")
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(defaults.max_retries),
            initial_delay: var("RETRY_INITIAL_DELAY_MS")
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_delay),
            max_delay: var("RETRY_MAX_DELAY_MS")
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
            factor: var("RETRY_FACTOR")
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|f| *f >= 1.0)
                .unwrap_or(defaults.factor),
            jitter: var("RETRY_JITTER")
                .map(|v| v != "false")
                .unwrap_or(defaults.jitter),
        }
    }

    fn next_delay(&self, current: Duration) -> Duration {
        current.mul_f64(self.factor).min(self.max_delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter {
            return delay;
        }
        let factor: f64 = rand::thread_rng().gen_range(0.5..=1.0);
        delay.mul_f64(factor)
    }
}

/// What `on_retry` sees before each back-off sleep.
#[derive(Debug)]
pub struct RetryAttempt<'a, E> {
    /// 1-based number of the retry about to happen.
    pub attempt: u32,
    pub delay: Duration,
    pub error: &'a E,
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// `policy.max_retries` retries have been spent.
///
/// `operation` receives the 0-based attempt number. The first retry waits
/// `initial_delay`; each later one waits `min(previous * factor, max_delay)`.
pub async fn with_retry<T, E, Op, Fut, P, R>(
    policy: &RetryPolicy,
    mut operation: Op,
    is_retryable: P,
    mut on_retry: R,
) -> Result<T, E>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    R: FnMut(&RetryAttempt<'_, E>),
{
    let mut attempt = 0u32;
    let mut delay = policy.initial_delay.min(policy.max_delay);

    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if attempt >= policy.max_retries || !is_retryable(&error) {
                    return Err(error);
                }

                let sleep_for = policy.jittered(delay);
                on_retry(&RetryAttempt {
                    attempt: attempt + 1,
                    delay: sleep_for,
                    error: &error,
                });
                tokio::time::sleep(sleep_for).await;

                delay = policy.next_delay(delay);
                attempt += 1;
            }
        }
    }
}

/// Default retry predicate for gateway calls: network failures, timeouts,
/// 408/429/5xx and the named transient provider codes.
pub fn is_transient(error: &PaymentError) -> bool {
    if error.is_retryable() {
        return true;
    }
    if let Some(code) = error.provider_code() {
        if TRANSIENT_ERROR_CODES.contains(&code.to_uppercase().as_str()) {
            return true;
        }
    }
    let text = error.to_string().to_uppercase();
    TRANSIENT_ERROR_CODES.iter().any(|code| text.contains(code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            factor: 2.0,
            jitter: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), PaymentError> = with_retry(
            &fast_policy(2),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(PaymentError::NetworkError {
                        message: "ECONNRESET".to_string(),
                    })
                }
            },
            is_transient,
            |_| {},
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn delays_grow_by_factor_and_cap() {
        let policy = fast_policy(5);
        let mut delay = policy.initial_delay;
        let mut seen = vec![delay];
        for _ in 0..5 {
            delay = policy.next_delay(delay);
            seen.push(delay);
        }
        let millis: Vec<u128> = seen.iter().map(|d| d.as_millis()).collect();
        assert_eq!(millis, vec![100, 200, 400, 800, 1000, 1000]);
    }

    #[test]
    fn jitter_stays_within_half_to_full_delay() {
        let policy = RetryPolicy {
            jitter: true,
            ..fast_policy(1)
        };
        for _ in 0..100 {
            let d = policy.jittered(Duration::from_millis(1000));
            assert!(d >= Duration::from_millis(500) && d <= Duration::from_millis(1000));
        }
    }

    #[test]
    fn transient_codes_are_recognised_in_provider_errors() {
        let err = PaymentError::ProviderError {
            provider: "paypal".to_string(),
            message: "INTERNAL_SERVER_ERROR: try later".to_string(),
            provider_code: Some("400".to_string()),
            retryable: false,
        };
        assert!(is_transient(&err));

        let err = PaymentError::provider("duitku", "Minimum Payment 10000 IDR");
        assert!(!is_transient(&err));
    }
}
