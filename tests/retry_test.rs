//! Back-off behaviour of gateway calls.

use premium_payments::payments::error::PaymentError;
use premium_payments::payments::retry::{is_transient, with_retry, RetryPolicy};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

fn policy(jitter: bool) -> RetryPolicy {
    RetryPolicy {
        max_retries: 5,
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_millis(1000),
        factor: 2.0,
        jitter,
    }
}

fn transient() -> PaymentError {
    PaymentError::NetworkError {
        message: "ECONNRESET while reading response".to_string(),
    }
}

#[tokio::test(start_paused = true)]
async fn succeeds_after_four_transient_failures() {
    let calls = AtomicU32::new(0);
    let delays = Mutex::new(Vec::new());
    let started = tokio::time::Instant::now();

    let result = with_retry(
        &policy(false),
        |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 4 {
                    Err(transient())
                } else {
                    Ok("captured")
                }
            }
        },
        is_transient,
        |retry| delays.lock().unwrap().push(retry.delay),
    )
    .await;

    assert_eq!(result.unwrap(), "captured");
    assert_eq!(calls.load(Ordering::SeqCst), 5);

    let delays = delays.into_inner().unwrap();
    let millis: Vec<u128> = delays.iter().map(|d| d.as_millis()).collect();
    assert_eq!(millis, vec![100, 200, 400, 800]);
    assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    assert!(started.elapsed() >= Duration::from_millis(1500));
}

#[tokio::test(start_paused = true)]
async fn jittered_delays_never_exceed_the_cap() {
    let delays = Mutex::new(Vec::new());

    let result: Result<(), PaymentError> = with_retry(
        &policy(true),
        |_| async { Err(transient()) },
        is_transient,
        |retry| delays.lock().unwrap().push(retry.delay),
    )
    .await;

    assert!(result.is_err());
    let delays = delays.into_inner().unwrap();
    assert_eq!(delays.len(), 5);
    assert!(delays
        .iter()
        .all(|d| *d <= Duration::from_millis(1000) && *d >= Duration::from_millis(50)));
}

#[tokio::test(start_paused = true)]
async fn non_retryable_errors_are_not_retried() {
    let calls = AtomicU32::new(0);
    let retries = AtomicU32::new(0);

    let result: Result<(), PaymentError> = with_retry(
        &policy(false),
        |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(PaymentError::ProviderError {
                    provider: "paypal".to_string(),
                    message: "INVALID_REQUEST".to_string(),
                    provider_code: Some("INVALID_REQUEST".to_string()),
                    retryable: false,
                })
            }
        },
        is_transient,
        |_| {
            retries.fetch_add(1, Ordering::SeqCst);
        },
    )
    .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(retries.load(Ordering::SeqCst), 0);
}

#[test]
fn transient_codes_are_recognised_in_provider_errors() {
    let rate_limited = PaymentError::ProviderError {
        provider: "paypal".to_string(),
        message: "too many requests".to_string(),
        provider_code: Some("rate_limit_reached".to_string()),
        retryable: false,
    };
    assert!(is_transient(&rate_limited));
    assert!(is_transient(&PaymentError::TimeoutError {
        message: "read timed out".to_string(),
    }));
    assert!(!is_transient(&PaymentError::ValidationError {
        message: "bad amount".to_string(),
        field: Some("amount".to_string()),
    }));
}
