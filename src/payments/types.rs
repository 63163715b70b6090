use crate::payments::error::{PaymentError, PaymentResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum GatewayName {
    Midtrans,
    Duitku,
    Paypal,
    PaypalMe,
    PaypalCheckoutLink,
}

impl GatewayName {
    pub const ALL: [GatewayName; 5] = [
        GatewayName::Midtrans,
        GatewayName::Duitku,
        GatewayName::Paypal,
        GatewayName::PaypalMe,
        GatewayName::PaypalCheckoutLink,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayName::Midtrans => "midtrans",
            GatewayName::Duitku => "duitku",
            GatewayName::Paypal => "paypal",
            GatewayName::PaypalMe => "paypal_me",
            GatewayName::PaypalCheckoutLink => "paypal_checkout_link",
        }
    }
}

impl std::fmt::Display for GatewayName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GatewayName {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().replace('-', "_").as_str() {
            "midtrans" => Ok(GatewayName::Midtrans),
            "duitku" => Ok(GatewayName::Duitku),
            "paypal" => Ok(GatewayName::Paypal),
            "paypal_me" | "paypalme" => Ok(GatewayName::PaypalMe),
            "paypal_checkout_link" | "paypal_link" => Ok(GatewayName::PaypalCheckoutLink),
            _ => Err(PaymentError::ValidationError {
                message: format!("unsupported gateway: {}", value),
                field: Some("gateway".to_string()),
            }),
        }
    }
}

/// Ledger status of a premium purchase.
///
/// `Pending` is the only non-terminal state. `Unknown` classifies a remote
/// answer that could not be mapped and is never written to the ledger.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
    Expired,
    Refunded,
    Cancelled,
    Unknown,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Success => "success",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Expired => "expired",
            TransactionStatus::Refunded => "refunded",
            TransactionStatus::Cancelled => "cancelled",
            TransactionStatus::Unknown => "unknown",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Success
                | TransactionStatus::Failed
                | TransactionStatus::Expired
                | TransactionStatus::Refunded
                | TransactionStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "pending" => Ok(TransactionStatus::Pending),
            "success" => Ok(TransactionStatus::Success),
            "failed" => Ok(TransactionStatus::Failed),
            "expired" => Ok(TransactionStatus::Expired),
            "refunded" => Ok(TransactionStatus::Refunded),
            "cancelled" | "canceled" => Ok(TransactionStatus::Cancelled),
            "unknown" => Ok(TransactionStatus::Unknown),
            _ => Err(PaymentError::ValidationError {
                message: format!("unsupported transaction status: {}", value),
                field: Some("status".to_string()),
            }),
        }
    }
}

/// Static facts about a gateway, fixed at construction.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct GatewayCapabilities {
    pub supports_cancellation: bool,
    pub supports_webhooks: bool,
    pub supports_status_check: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerInfo {
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackUrls {
    pub success: String,
    pub failure: String,
    pub webhook: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTransactionRequest {
    pub customer: CustomerInfo,
    /// IDR, whole rupiah.
    pub amount: i64,
    pub order_id: String,
    pub description: String,
    pub callbacks: CallbackUrls,
    pub payment_method: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTransactionResult {
    pub success: bool,
    pub redirect_url: Option<String>,
    pub gateway_reference: Option<String>,
    pub details: JsonValue,
    pub error: Option<String>,
}

impl CreateTransactionResult {
    pub fn created(
        redirect_url: impl Into<String>,
        gateway_reference: Option<String>,
        details: JsonValue,
    ) -> Self {
        Self {
            success: true,
            redirect_url: Some(redirect_url.into()),
            gateway_reference,
            details,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            redirect_url: None,
            gateway_reference: None,
            details: JsonValue::Null,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRequest {
    pub order_id: String,
    /// Provider-side id where it differs from the order id (PayPal order id).
    pub gateway_reference: Option<String>,
}

impl StatusRequest {
    pub fn for_order(order_id: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            gateway_reference: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyTransactionResult {
    pub is_valid: bool,
    pub status: TransactionStatus,
    pub amount: Option<i64>,
    pub payment_method: Option<String>,
    pub details: JsonValue,
    pub error: Option<String>,
}

impl VerifyTransactionResult {
    pub fn verified(status: TransactionStatus, details: JsonValue) -> Self {
        Self {
            is_valid: true,
            status,
            amount: None,
            payment_method: None,
            details,
            error: None,
        }
    }

    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            status: TransactionStatus::Unknown,
            amount: None,
            payment_method: None,
            details: JsonValue::Null,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationResult {
    pub order_id: String,
    pub status: TransactionStatus,
    pub is_success: bool,
    pub amount: Option<i64>,
    pub payment_method: Option<String>,
    pub details: JsonValue,
    pub event_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelTransactionResult {
    pub success: bool,
    /// True only when the provider itself acknowledged the cancellation.
    pub remote_cancelled: bool,
    pub message: Option<String>,
    pub error: Option<String>,
}

impl CancelTransactionResult {
    pub fn local_only(gateway: GatewayName) -> Self {
        Self {
            success: true,
            remote_cancelled: false,
            message: Some(format!(
                "{} has no cancellation API; the transaction is marked cancelled only in the local ledger",
                gateway
            )),
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookVerificationResult {
    pub valid: bool,
    pub reason: Option<String>,
}

impl WebhookVerificationResult {
    pub fn accepted() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }
}

/// Inbound notification as the HTTP layer received it.
///
/// `raw_body` is kept byte-exact for signature checks; `payload` is the parsed
/// view (form-encoded callbacks become a flat object of strings).
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    headers: HashMap<String, String>,
    pub raw_body: Vec<u8>,
    pub payload: JsonValue,
}

impl WebhookRequest {
    pub fn from_parts<I, K, V>(headers: I, raw_body: Vec<u8>) -> PaymentResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let headers: HashMap<String, String> = headers
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_ascii_lowercase(), v.into()))
            .collect();

        let is_form = headers
            .get("content-type")
            .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
            .unwrap_or(false);

        let payload = if is_form {
            let mut map = Map::new();
            for (k, v) in url::form_urlencoded::parse(&raw_body) {
                map.insert(k.into_owned(), JsonValue::String(v.into_owned()));
            }
            JsonValue::Object(map)
        } else {
            serde_json::from_slice(&raw_body).map_err(|e| PaymentError::ValidationError {
                message: format!("webhook body is not valid JSON: {}", e),
                field: Some("body".to_string()),
            })?
        };

        Ok(Self {
            headers,
            raw_body,
            payload,
        })
    }

    /// Header lookup, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|v| v.as_str())
            .filter(|v| !v.trim().is_empty())
    }
}

/// String field from a provider payload, accepting numbers as well.
pub(crate) fn json_str(value: &JsonValue, key: &str) -> Option<String> {
    match value.get(key)? {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parses provider amount strings like `"99000.00"` into whole rupiah.
pub(crate) fn parse_idr_amount(raw: &str) -> Option<i64> {
    use rust_decimal::prelude::ToPrimitive;
    let parsed = rust_decimal::Decimal::from_str(raw.trim()).ok()?;
    parsed.round().to_i64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_name_parsing_accepts_aliases() {
        assert_eq!(GatewayName::from_str("PayPal-Me").unwrap(), GatewayName::PaypalMe);
        assert_eq!(GatewayName::from_str(" duitku ").unwrap(), GatewayName::Duitku);
        assert!(GatewayName::from_str("stripe").is_err());
        for name in GatewayName::ALL {
            assert_eq!(GatewayName::from_str(name.as_str()).unwrap(), name);
        }
    }

    #[test]
    fn only_pending_and_unknown_are_non_terminal() {
        assert!(!TransactionStatus::Pending.is_terminal());
        assert!(!TransactionStatus::Unknown.is_terminal());
        assert!(TransactionStatus::Success.is_terminal());
        assert!(TransactionStatus::Cancelled.is_terminal());
        assert_eq!(
            TransactionStatus::from_str("canceled").unwrap(),
            TransactionStatus::Cancelled
        );
    }

    #[test]
    fn webhook_request_parses_form_bodies() {
        let body = b"merchantCode=D0001&amount=99000&merchantOrderId=PREM-1&resultCode=00".to_vec();
        let request = WebhookRequest::from_parts(
            [("Content-Type", "application/x-www-form-urlencoded")],
            body,
        )
        .unwrap();

        assert_eq!(request.payload["merchantCode"], "D0001");
        assert_eq!(request.payload["resultCode"], "00");
        assert_eq!(
            request.header("content-type"),
            Some("application/x-www-form-urlencoded")
        );
    }

    #[test]
    fn webhook_request_rejects_malformed_json() {
        let result = WebhookRequest::from_parts(Vec::<(String, String)>::new(), b"{nope".to_vec());
        assert!(result.is_err());
    }

    #[test]
    fn idr_amounts_are_rounded_to_whole_rupiah() {
        assert_eq!(parse_idr_amount("99000.00"), Some(99000));
        assert_eq!(parse_idr_amount("99000"), Some(99000));
        assert_eq!(parse_idr_amount("abc"), None);
    }
}
