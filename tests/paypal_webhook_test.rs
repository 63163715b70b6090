//! PayPal transmission-signature verification against a locally issued
//! signing certificate.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use premium_payments::payments::error::PaymentResult;
use premium_payments::payments::providers::paypal_webhook::{
    CertificateFetcher, PaypalWebhookVerifier, CERT_URL_HEADER, TRANSMISSION_ID_HEADER,
    TRANSMISSION_SIG_HEADER, TRANSMISSION_TIME_HEADER,
};
use premium_payments::payments::signature::paypal_transmission_message;
use premium_payments::payments::types::WebhookRequest;
use ring::rand::SystemRandom;
use ring::signature::{RsaKeyPair, RSA_PKCS1_SHA256};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use url::Url;

const BODY: &[u8] = include_bytes!("fixtures/webhook_body.json");
const SIGNATURE: &str = include_str!("fixtures/webhook_body.sig.b64");
const CERT_PEM: &[u8] = include_bytes!("fixtures/webhook_signing_cert.pem");
const KEY_PKCS8: &[u8] = include_bytes!("fixtures/webhook_signing_key.pk8.der");

const WEBHOOK_ID: &str = "WH-TEST-ID";
const TRANSMISSION_ID: &str = "b4e3a0f0-0000-4000-8000-000000000001";
const TRANSMISSION_TIME: &str = "2026-01-01T00:00:00Z";
const CERT_URL: &str = "https://api.sandbox.paypal.com/v1/notifications/certs/CERT-TEST";

/// Serves the fixture certificate and counts downloads.
#[derive(Default)]
struct FixtureCertificates {
    fetches: AtomicU32,
}

#[async_trait]
impl CertificateFetcher for FixtureCertificates {
    async fn fetch(&self, _url: &Url) -> PaymentResult<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(CERT_PEM.to_vec())
    }
}

fn verifier(fetcher: Arc<FixtureCertificates>) -> PaypalWebhookVerifier {
    PaypalWebhookVerifier::new(WEBHOOK_ID, false, false, fetcher)
}

fn request(body: &[u8], transmission_id: &str, signature: &str, cert_url: &str) -> WebhookRequest {
    WebhookRequest::from_parts(
        [
            ("Content-Type", "application/json"),
            ("PAYPAL-TRANSMISSION-ID", transmission_id),
            ("PAYPAL-TRANSMISSION-TIME", TRANSMISSION_TIME),
            ("PAYPAL-TRANSMISSION-SIG", signature.trim()),
            ("PAYPAL-CERT-URL", cert_url),
            ("PAYPAL-AUTH-ALGO", "SHA256withRSA"),
        ],
        body.to_vec(),
    )
    .unwrap()
}

fn sign(message: &str) -> String {
    let key = RsaKeyPair::from_pkcs8(KEY_PKCS8).unwrap();
    let mut signature = vec![0u8; key.public().modulus_len()];
    key.sign(&RSA_PKCS1_SHA256, &SystemRandom::new(), message.as_bytes(), &mut signature)
        .unwrap();
    STANDARD.encode(signature)
}

#[tokio::test]
async fn recorded_delivery_verifies() {
    let fetcher = Arc::new(FixtureCertificates::default());
    let result = verifier(fetcher.clone())
        .verify(&request(BODY, TRANSMISSION_ID, SIGNATURE, CERT_URL))
        .await
        .unwrap();

    assert!(result.valid, "{:?}", result.reason);
    assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn one_changed_body_byte_fails_verification() {
    let mut tampered = BODY.to_vec();
    let position = tampered
        .windows(4)
        .position(|w| w == b"6.19")
        .expect("amount in fixture body");
    tampered[position] = b'9';

    let result = verifier(Arc::new(FixtureCertificates::default()))
        .verify(&request(&tampered, TRANSMISSION_ID, SIGNATURE, CERT_URL))
        .await
        .unwrap();

    assert!(!result.valid);
}

#[tokio::test]
async fn freshly_signed_delivery_verifies() {
    let transmission_id = "5f1c7a52-1111-4000-8000-0000000000aa";
    let body = br#"{"id":"WH-EVT-2","event_type":"PAYMENT.CAPTURE.DENIED","resource":{"id":"CAP-2","status":"DECLINED","custom_id":"PREM-20260301120000-0000BEEF"}}"#;
    let message = paypal_transmission_message(transmission_id, TRANSMISSION_TIME, WEBHOOK_ID, body);
    let signature = sign(&message);

    let ok = verifier(Arc::new(FixtureCertificates::default()))
        .verify(&request(body, transmission_id, &signature, CERT_URL))
        .await
        .unwrap();
    assert!(ok.valid, "{:?}", ok.reason);

    // Same signature replayed under another transmission id.
    let replayed = verifier(Arc::new(FixtureCertificates::default()))
        .verify(&request(body, TRANSMISSION_ID, &signature, CERT_URL))
        .await
        .unwrap();
    assert!(!replayed.valid);
}

#[tokio::test]
async fn missing_headers_are_rejected_without_fetching() {
    let fetcher = Arc::new(FixtureCertificates::default());
    let request = WebhookRequest::from_parts(
        [
            ("content-type", "application/json"),
            (TRANSMISSION_ID_HEADER, TRANSMISSION_ID),
            (TRANSMISSION_TIME_HEADER, TRANSMISSION_TIME),
        ],
        BODY.to_vec(),
    )
    .unwrap();

    let result = verifier(fetcher.clone()).verify(&request).await.unwrap();

    assert!(!result.valid);
    let reason = result.reason.unwrap();
    assert!(reason.contains(TRANSMISSION_SIG_HEADER), "{}", reason);
    assert!(reason.contains(CERT_URL_HEADER), "{}", reason);
    assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn foreign_certificate_hosts_are_never_fetched() {
    let fetcher = Arc::new(FixtureCertificates::default());
    for cert_url in [
        "https://attacker.example/certs/CERT-TEST",
        "http://api.sandbox.paypal.com/v1/notifications/certs/CERT-TEST",
        "https://api.sandbox.paypal.com.attacker.example/certs/CERT-TEST",
    ] {
        let result = verifier(fetcher.clone())
            .verify(&request(BODY, TRANSMISSION_ID, SIGNATURE, cert_url))
            .await
            .unwrap();
        assert!(!result.valid, "{} should be refused", cert_url);
    }
    assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn sandbox_override_never_applies_in_production() {
    let mut tampered = BODY.to_vec();
    tampered.push(b' ');

    let sandbox = PaypalWebhookVerifier::new(
        WEBHOOK_ID,
        false,
        true,
        Arc::new(FixtureCertificates::default()),
    );
    let accepted = sandbox
        .verify(&request(&tampered, TRANSMISSION_ID, SIGNATURE, CERT_URL))
        .await
        .unwrap();
    assert!(accepted.valid);

    let production = PaypalWebhookVerifier::new(
        WEBHOOK_ID,
        true,
        true,
        Arc::new(FixtureCertificates::default()),
    );
    let rejected = production
        .verify(&request(&tampered, TRANSMISSION_ID, SIGNATURE, CERT_URL))
        .await
        .unwrap();
    assert!(!rejected.valid);
}
