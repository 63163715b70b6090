use crate::logging::redact_text;
use crate::payments::error::{PaymentError, PaymentResult};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::debug;

/// Credentials attached to an outbound provider call.
#[derive(Debug, Clone, Copy)]
pub enum HttpAuth<'a> {
    None,
    Bearer(&'a str),
    Basic {
        username: &'a str,
        password: &'a str,
    },
}

#[derive(Debug, Clone, Copy)]
pub enum HttpBody<'a> {
    Empty,
    Json(&'a JsonValue),
    /// Pre-encoded `application/x-www-form-urlencoded` body.
    Form(&'a str),
}

/// Thin reqwest wrapper shared by every gateway.
///
/// Performs exactly one attempt per call under a hard timeout and classifies
/// the failure; retry policy is the caller's decision (see `payments::retry`).
#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    timeout: Duration,
}

impl PaymentHttpClient {
    pub fn new(timeout: Duration) -> PaymentResult<Self> {
        let client =
            Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| PaymentError::NetworkError {
                    message: format!("failed to initialize HTTP client: {}", e),
                })?;

        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn request_json<T: DeserializeOwned>(
        &self,
        provider: &str,
        method: Method,
        url: &str,
        auth: HttpAuth<'_>,
        body: HttpBody<'_>,
        additional_headers: &[(&str, &str)],
    ) -> PaymentResult<T> {
        let text = self
            .request_text(provider, method, url, auth, body, additional_headers)
            .await?;
        serde_json::from_str::<T>(&text).map_err(|e| PaymentError::ProviderError {
            provider: provider.to_string(),
            message: format!("invalid provider JSON response: {}", e),
            provider_code: None,
            retryable: false,
        })
    }

    pub async fn request_text(
        &self,
        provider: &str,
        method: Method,
        url: &str,
        auth: HttpAuth<'_>,
        body: HttpBody<'_>,
        additional_headers: &[(&str, &str)],
    ) -> PaymentResult<String> {
        let mut request = self.client.request(method.clone(), url).timeout(self.timeout);

        request = match auth {
            HttpAuth::None => request,
            HttpAuth::Bearer(token) => request.bearer_auth(token),
            HttpAuth::Basic { username, password } => request.basic_auth(username, Some(password)),
        };
        for (k, v) in additional_headers {
            request = request.header(*k, *v);
        }
        request = match body {
            HttpBody::Empty => request,
            HttpBody::Json(payload) => request.json(payload),
            HttpBody::Form(encoded) => request
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(encoded.to_string()),
        };

        debug!(provider = %provider, method = %method, url = %url, "provider request");

        let response = request
            .send()
            .await
            .map_err(|e| classify_transport_error(provider, &e))?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let text = response
            .text()
            .await
            .map_err(|e| classify_transport_error(provider, &e))?;

        if status.is_success() {
            return Ok(text);
        }

        Err(classify_status(provider, status, retry_after, &text))
    }
}

fn classify_transport_error(provider: &str, e: &reqwest::Error) -> PaymentError {
    if e.is_timeout() {
        PaymentError::TimeoutError {
            message: format!("{} request timed out (ETIMEDOUT)", provider),
        }
    } else if e.is_connect() {
        PaymentError::NetworkError {
            message: format!("{} connection failed (ECONNREFUSED): {}", provider, e),
        }
    } else {
        PaymentError::NetworkError {
            message: format!("{} request failed: {}", provider, e),
        }
    }
}

fn classify_status(
    provider: &str,
    status: StatusCode,
    retry_after: Option<u64>,
    body: &str,
) -> PaymentError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return PaymentError::RateLimitError {
            message: format!("{} rate limit exceeded", provider),
            retry_after_seconds: retry_after,
        };
    }

    let snippet: String = body.chars().take(512).collect();
    PaymentError::ProviderError {
        provider: provider.to_string(),
        message: format!("HTTP {}: {}", status.as_u16(), redact_text(&snippet)),
        provider_code: Some(status.as_u16().to_string()),
        retryable: status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT,
    }
}

/// Constant-time comparison for signatures and digests.
pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_eq_behaves_correctly() {
        assert!(secure_eq(b"abc", b"abc"));
        assert!(!secure_eq(b"abc", b"abd"));
        assert!(!secure_eq(b"abc", b"ab"));
    }

    #[test]
    fn status_classification_marks_server_errors_retryable() {
        let err = classify_status("duitku", StatusCode::BAD_GATEWAY, None, "upstream");
        assert!(err.is_retryable());
        assert_eq!(err.provider_code(), Some("502"));

        let err = classify_status("duitku", StatusCode::BAD_REQUEST, None, "bad signature");
        assert!(!err.is_retryable());

        let err = classify_status("paypal", StatusCode::TOO_MANY_REQUESTS, Some(7), "");
        assert!(matches!(
            err,
            PaymentError::RateLimitError {
                retry_after_seconds: Some(7),
                ..
            }
        ));
    }

    #[test]
    fn request_timeout_status_is_retryable() {
        let err = classify_status("midtrans", StatusCode::REQUEST_TIMEOUT, None, "");
        assert!(err.is_retryable());
    }
}
