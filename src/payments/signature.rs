//! Digest and signature helpers for gateway request signing and webhook checks.
//!
//! Each provider's scheme is fixed by its own API contract and must not be unified.

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::utils::secure_eq;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use md5::{Digest as _, Md5};
use rustls_pki_types::{pem::PemObject, CertificateDer};
use sha2::{Sha256, Sha512};

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn sha512_hex(input: &str) -> String {
    hex::encode(Sha512::digest(input.as_bytes()))
}

pub fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

/// Midtrans notification `signature_key`: SHA-512 over order id, status code,
/// gross amount and server key.
pub fn midtrans_notification_signature(
    order_id: &str,
    status_code: &str,
    gross_amount: &str,
    server_key: &str,
) -> String {
    sha512_hex(&format!(
        "{}{}{}{}",
        order_id, status_code, gross_amount, server_key
    ))
}

/// Duitku inquiry signature: MD5(merchantCode + merchantOrderId + paymentAmount + apiKey).
pub fn duitku_inquiry_signature(
    merchant_code: &str,
    order_id: &str,
    amount: i64,
    api_key: &str,
) -> String {
    md5_hex(&format!("{}{}{}{}", merchant_code, order_id, amount, api_key))
}

/// Duitku callback signature: MD5(merchantCode + amount + merchantOrderId + apiKey).
pub fn duitku_callback_signature(
    merchant_code: &str,
    amount: &str,
    order_id: &str,
    api_key: &str,
) -> String {
    md5_hex(&format!("{}{}{}{}", merchant_code, amount, order_id, api_key))
}

/// Duitku status-check signature: MD5(merchantCode + merchantOrderId + apiKey).
pub fn duitku_status_signature(merchant_code: &str, order_id: &str, api_key: &str) -> String {
    md5_hex(&format!("{}{}{}", merchant_code, order_id, api_key))
}

/// Compares a computed hex digest against one supplied by a provider.
pub fn verify_hex_digest(expected: &str, provided: &str) -> bool {
    secure_eq(
        expected.to_ascii_lowercase().as_bytes(),
        provided.trim().to_ascii_lowercase().as_bytes(),
    )
}

/// The string PayPal signs for webhook deliveries:
/// `transmissionId|timestamp|webhookId|hex(sha256(body))`.
pub fn paypal_transmission_message(
    transmission_id: &str,
    transmission_time: &str,
    webhook_id: &str,
    body: &[u8],
) -> String {
    format!(
        "{}|{}|{}|{}",
        transmission_id,
        transmission_time,
        webhook_id,
        sha256_hex(body)
    )
}

/// Checks an RSA PKCS#1 v1.5 / SHA-256 signature against the public key of a
/// PEM-encoded certificate.
///
/// Returns `Ok(false)` for a well-formed signature that does not match and
/// `Err` when the certificate or signature cannot be decoded at all.
pub fn verify_rsa_sha256_with_certificate(
    certificate_pem: &[u8],
    message: &[u8],
    signature_b64: &str,
) -> PaymentResult<bool> {
    let certificate = CertificateDer::from_pem_slice(certificate_pem).map_err(|e| {
        PaymentError::WebhookVerificationError {
            message: format!("signing certificate is not valid PEM: {:?}", e),
        }
    })?;
    let end_entity = webpki::EndEntityCert::try_from(&certificate).map_err(|e| {
        PaymentError::WebhookVerificationError {
            message: format!("signing certificate could not be parsed: {:?}", e),
        }
    })?;
    let signature = STANDARD
        .decode(signature_b64.trim())
        .map_err(|e| PaymentError::WebhookVerificationError {
            message: format!("transmission signature is not base64: {}", e),
        })?;

    Ok(end_entity
        .verify_signature(webpki::ring::RSA_PKCS1_2048_8192_SHA256, message, &signature)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn midtrans_signature_matches_known_vector() {
        // sha512("PREM-1" + "200" + "99000.00" + "server-key")
        let expected = sha512_hex("PREM-120099000.00server-key");
        assert_eq!(
            midtrans_notification_signature("PREM-1", "200", "99000.00", "server-key"),
            expected
        );
        assert_eq!(expected.len(), 128);
    }

    #[test]
    fn duitku_schemes_order_fields_differently() {
        let inquiry = duitku_inquiry_signature("D0001", "PREM-1", 99000, "key");
        let callback = duitku_callback_signature("D0001", "99000", "PREM-1", "key");
        assert_eq!(inquiry, md5_hex("D0001PREM-199000key"));
        assert_eq!(callback, md5_hex("D000199000PREM-1key"));
        assert_ne!(inquiry, callback);
        assert_eq!(
            duitku_status_signature("D0001", "PREM-1", "key"),
            md5_hex("D0001PREM-1key")
        );
    }

    #[test]
    fn md5_and_sha256_known_answers() {
        assert_eq!(md5_hex(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn hex_digest_comparison_ignores_case_and_whitespace() {
        assert!(verify_hex_digest("abcdef", " ABCDEF "));
        assert!(!verify_hex_digest("abcdef", "abcdee"));
    }

    #[test]
    fn transmission_message_hashes_the_raw_body() {
        let message = paypal_transmission_message("t-1", "2026-01-01T00:00:00Z", "WH-1", b"abc");
        assert_eq!(
            message,
            "t-1|2026-01-01T00:00:00Z|WH-1|ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn garbage_certificate_is_an_error() {
        let result = verify_rsa_sha256_with_certificate(b"not a cert", b"msg", "AAAA");
        assert!(result.is_err());
    }
}
