//! Tracing setup and redaction helpers.
//!
//! Provider payloads carry keys, signatures and customer contact details. Anything
//! logged from the payment core goes through [`redact_json`] or [`redact_text`]
//! first; correlation ids travel on the `payment` span.

use crate::config::{LogFormat, LoggingConfig};
use regex::Regex;
use serde_json::{Map, Value as JsonValue};
use std::sync::OnceLock;
use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const MASK: &str = "****";

/// Keys whose values are never written to logs in clear.
const SENSITIVE_KEYS: &[&str] = &[
    "signature",
    "signature_key",
    "server_key",
    "client_key",
    "api_key",
    "apikey",
    "merchantkey",
    "access_token",
    "client_secret",
    "authorization",
    "password",
    "secret",
    "token",
    "paypal-transmission-sig",
];

const EMAIL_KEYS: &[&str] = &["email", "payer_email", "receiver_email", "business"];
const PHONE_KEYS: &[&str] = &["phone", "phonenumber", "phone_number", "contact_phone"];

/// Initialise the global subscriber. Safe to call more than once; later calls are ignored.
pub fn init_tracing(config: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_lowercase()));

    let result = match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true),
            )
            .try_init(),
        LogFormat::Plain => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(true))
            .try_init(),
    };

    if result.is_ok() {
        tracing::info!(level = %config.level, format = ?config.format, "tracing initialised");
    }
}

/// Span every payment task runs in, so webhook, poll and API logs share ids.
pub fn payment_span(request_id: &str, order_id: Option<&str>) -> Span {
    tracing::info_span!(
        "payment",
        request_id = %request_id,
        order_id = order_id.unwrap_or("-"),
    )
}

/// Deep copy of `value` with secrets masked and contact details partially hidden.
pub fn redact_json(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => {
            let mut redacted = Map::with_capacity(map.len());
            for (key, val) in map {
                let lowered = key.to_lowercase();
                let out = if SENSITIVE_KEYS.contains(&lowered.as_str()) {
                    mask_value(val)
                } else if EMAIL_KEYS.contains(&lowered.as_str()) {
                    match val.as_str() {
                        Some(s) => JsonValue::String(mask_email(s)),
                        None => redact_json(val),
                    }
                } else if PHONE_KEYS.contains(&lowered.as_str()) {
                    match val.as_str() {
                        Some(s) => JsonValue::String(mask_phone(s)),
                        None => redact_json(val),
                    }
                } else {
                    redact_json(val)
                };
                redacted.insert(key.clone(), out);
            }
            JsonValue::Object(redacted)
        }
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(redact_json).collect()),
        JsonValue::String(s) => JsonValue::String(redact_text(s)),
        _ => value.clone(),
    }
}

fn mask_value(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::String(s) => JsonValue::String(mask_secret(s)),
        JsonValue::Null => JsonValue::Null,
        _ => JsonValue::String(MASK.to_string()),
    }
}

/// Keeps the first and last four characters of long secrets.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 12 {
        return MASK.to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}{}", head, MASK, tail)
}

pub fn mask_email(email: &str) -> String {
    match email.find('@') {
        Some(at) if at > 0 => {
            let first: String = email.chars().take(1).collect();
            format!("{}***{}", first, &email[at..])
        }
        _ => MASK.to_string(),
    }
}

pub fn mask_phone(phone: &str) -> String {
    let digits: Vec<char> = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 4 {
        return MASK.to_string();
    }
    let tail: String = digits[digits.len() - 4..].iter().collect();
    format!("{}{}", MASK, tail)
}

fn email_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").ok())
        .as_ref()
}

fn bearer_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)(bearer|basic)\s+[A-Za-z0-9\-._~+/=]+").ok())
        .as_ref()
}

/// Masks e-mail addresses and auth header values embedded in free text,
/// e.g. provider error messages echoed back into logs.
pub fn redact_text(text: &str) -> String {
    let mut out = text.to_string();
    if let Some(re) = bearer_pattern() {
        out = re.replace_all(&out, "$1 ****").into_owned();
    }
    if let Some(re) = email_pattern() {
        out = re
            .replace_all(&out, |caps: &regex::Captures<'_>| mask_email(&caps[0]))
            .into_owned();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redacts_signatures_and_keys_at_any_depth() {
        let payload = json!({
            "order_id": "PREM-20260101000000-ABCDEF12",
            "signature_key": "0123456789abcdef0123456789abcdef",
            "nested": { "server_key": "SB-Mid-server-abcdefghijklmnop" },
            "gross_amount": "99000.00"
        });

        let redacted = redact_json(&payload);
        assert_eq!(redacted["order_id"], "PREM-20260101000000-ABCDEF12");
        assert_eq!(redacted["gross_amount"], "99000.00");
        assert_eq!(redacted["signature_key"], "0123****cdef");
        assert!(redacted["nested"]["server_key"]
            .as_str()
            .unwrap()
            .contains("****"));
    }

    #[test]
    fn short_secrets_are_fully_masked() {
        assert_eq!(mask_secret("abc"), "****");
        assert_eq!(mask_secret("exactly12chr"), "****");
    }

    #[test]
    fn email_and_phone_are_partially_masked() {
        let payload = json!({"email": "buyer@example.com", "phoneNumber": "+62 812 3456 7890"});
        let redacted = redact_json(&payload);
        assert_eq!(redacted["email"], "b***@example.com");
        assert_eq!(redacted["phoneNumber"], "****7890");
    }

    #[test]
    fn free_text_hides_auth_headers_and_addresses() {
        let text = "request with Bearer A21AAF.xyz failed for buyer@example.com";
        let redacted = redact_text(text);
        assert!(!redacted.contains("A21AAF"));
        assert!(redacted.contains("b***@example.com"));
    }
}
