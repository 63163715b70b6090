//! PayPal webhook signature verification.
//!
//! PayPal signs `transmissionId|timestamp|webhookId|hex(sha256(body))` with
//! the key of a certificate it links in `PAYPAL-CERT-URL`. The URL is only
//! fetched when its host is one of PayPal's API hosts.

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::signature::{paypal_transmission_message, verify_rsa_sha256_with_certificate};
use crate::payments::types::{GatewayName, WebhookRequest, WebhookVerificationResult};
use crate::payments::utils::{HttpAuth, HttpBody, PaymentHttpClient};
use async_trait::async_trait;
use reqwest::Method;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use url::Url;

pub const TRANSMISSION_ID_HEADER: &str = "paypal-transmission-id";
pub const TRANSMISSION_TIME_HEADER: &str = "paypal-transmission-time";
pub const TRANSMISSION_SIG_HEADER: &str = "paypal-transmission-sig";
pub const CERT_URL_HEADER: &str = "paypal-cert-url";
pub const AUTH_ALGO_HEADER: &str = "paypal-auth-algo";

pub const ALLOWED_CERT_HOSTS: &[&str] = &[
    "api.paypal.com",
    "api-m.paypal.com",
    "api.sandbox.paypal.com",
    "api-m.sandbox.paypal.com",
];

/// Source of signing certificates (PEM bytes).
#[async_trait]
pub trait CertificateFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> PaymentResult<Vec<u8>>;
}

/// Downloads certificates over HTTPS and keeps them for the process lifetime.
pub struct HttpCertificateFetcher {
    http: PaymentHttpClient,
    cache: RwLock<HashMap<String, Vec<u8>>>,
}

impl HttpCertificateFetcher {
    pub fn new(http: PaymentHttpClient) -> Self {
        Self {
            http,
            cache: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl CertificateFetcher for HttpCertificateFetcher {
    async fn fetch(&self, url: &Url) -> PaymentResult<Vec<u8>> {
        if let Some(pem) = self.cache.read().await.get(url.as_str()) {
            return Ok(pem.clone());
        }
        debug!(cert_url = %url, "fetching paypal signing certificate");
        let pem = self
            .http
            .request_text(
                GatewayName::Paypal.as_str(),
                Method::GET,
                url.as_str(),
                HttpAuth::None,
                HttpBody::Empty,
                &[],
            )
            .await?
            .into_bytes();
        self.cache
            .write()
            .await
            .insert(url.as_str().to_string(), pem.clone());
        Ok(pem)
    }
}

/// Validates `PAYPAL-CERT-URL`: https and an allow-listed host.
pub fn validate_cert_url(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw).map_err(|e| format!("certificate URL is not a URL: {}", e))?;
    if url.scheme() != "https" {
        return Err("certificate URL must use https".to_string());
    }
    match url.host_str() {
        Some(host) if ALLOWED_CERT_HOSTS.contains(&host.to_ascii_lowercase().as_str()) => Ok(url),
        Some(host) => Err(format!("certificate host {} is not a PayPal API host", host)),
        None => Err("certificate URL has no host".to_string()),
    }
}

pub struct PaypalWebhookVerifier {
    webhook_id: String,
    /// Accept unverifiable deliveries. Only ever true against the sandbox.
    accept_unverified: bool,
    fetcher: Arc<dyn CertificateFetcher>,
}

impl PaypalWebhookVerifier {
    /// `allow_unverified_sandbox` is ignored when `is_production` is set.
    pub fn new(
        webhook_id: impl Into<String>,
        is_production: bool,
        allow_unverified_sandbox: bool,
        fetcher: Arc<dyn CertificateFetcher>,
    ) -> Self {
        Self {
            webhook_id: webhook_id.into(),
            accept_unverified: !is_production && allow_unverified_sandbox,
            fetcher,
        }
    }

    pub async fn verify(&self, request: &WebhookRequest) -> PaymentResult<WebhookVerificationResult> {
        let mut missing = Vec::new();
        let mut header = |name: &'static str| {
            let value = request.header(name);
            if value.is_none() {
                missing.push(name);
            }
            value
        };
        let transmission_id = header(TRANSMISSION_ID_HEADER);
        let transmission_time = header(TRANSMISSION_TIME_HEADER);
        let transmission_sig = header(TRANSMISSION_SIG_HEADER);
        let cert_url = header(CERT_URL_HEADER);

        let (Some(transmission_id), Some(transmission_time), Some(transmission_sig), Some(cert_url)) =
            (transmission_id, transmission_time, transmission_sig, cert_url)
        else {
            return Ok(WebhookVerificationResult::rejected(format!(
                "missing signature headers: {}",
                missing.join(", ")
            )));
        };

        if let Some(algo) = request.header(AUTH_ALGO_HEADER) {
            if !algo.eq_ignore_ascii_case("SHA256withRSA") {
                return Ok(WebhookVerificationResult::rejected(format!(
                    "unsupported auth algorithm {}",
                    algo
                )));
            }
        }

        let cert_url = match validate_cert_url(cert_url) {
            Ok(url) => url,
            Err(reason) => return Ok(WebhookVerificationResult::rejected(reason)),
        };

        if self.webhook_id.trim().is_empty() {
            return Ok(self.unverified("PAYPAL_WEBHOOK_ID is not configured"));
        }

        let certificate = match self.fetcher.fetch(&cert_url).await {
            Ok(pem) => pem,
            Err(e) => {
                warn!(cert_url = %cert_url, error = %e, "paypal certificate fetch failed");
                if self.accept_unverified {
                    return Ok(self.unverified(&e.to_string()));
                }
                return Err(e);
            }
        };

        let message = paypal_transmission_message(
            transmission_id,
            transmission_time,
            &self.webhook_id,
            &request.raw_body,
        );
        match verify_rsa_sha256_with_certificate(&certificate, message.as_bytes(), transmission_sig) {
            Ok(true) => Ok(WebhookVerificationResult::accepted()),
            Ok(false) => Ok(self.unverified("transmission signature does not match")),
            Err(PaymentError::WebhookVerificationError { message }) => Ok(self.unverified(&message)),
            Err(e) => Err(e),
        }
    }

    fn unverified(&self, reason: &str) -> WebhookVerificationResult {
        if self.accept_unverified {
            warn!(reason = %reason, "accepting unverified paypal sandbox webhook");
            WebhookVerificationResult::accepted()
        } else {
            WebhookVerificationResult::rejected(reason)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cert_url_must_be_https_paypal_host() {
        assert!(validate_cert_url("https://api.sandbox.paypal.com/v1/notifications/certs/CERT-1").is_ok());
        assert!(validate_cert_url("https://API-M.PAYPAL.COM/certs/1").is_ok());
        assert!(validate_cert_url("http://api.paypal.com/certs/1").is_err());
        assert!(validate_cert_url("https://api.paypal.com.evil.example/certs/1").is_err());
        assert!(validate_cert_url("https://paypal.com@evil.example/certs/1").is_err());
        assert!(validate_cert_url("not a url").is_err());
    }
}
