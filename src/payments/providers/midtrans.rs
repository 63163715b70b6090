use crate::config::PaymentRuntimeConfig;
use crate::logging::redact_json;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::gateway::{trust_but_verify, PaymentGateway};
use crate::payments::settings::SettingsSnapshot;
use crate::payments::signature::{midtrans_notification_signature, verify_hex_digest};
use crate::payments::types::{
    json_str, parse_idr_amount, CancelTransactionResult, CreateTransactionRequest,
    CreateTransactionResult, GatewayCapabilities, GatewayName, NotificationResult, StatusRequest,
    TransactionStatus, VerifyTransactionResult, WebhookRequest, WebhookVerificationResult,
};
use crate::payments::utils::{HttpAuth, HttpBody, PaymentHttpClient};
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, info, warn};

const SANDBOX_SNAP_URL: &str = "https://app.sandbox.midtrans.com";
const SANDBOX_API_URL: &str = "https://api.sandbox.midtrans.com";
const PRODUCTION_SNAP_URL: &str = "https://app.midtrans.com";
const PRODUCTION_API_URL: &str = "https://api.midtrans.com";

#[derive(Debug, Clone)]
pub struct MidtransConfig {
    pub server_key: String,
    pub client_key: Option<String>,
    pub is_production: bool,
    pub snap_base_url: String,
    pub api_base_url: String,
    pub expiry_minutes: u64,
    pub trust_payload_on_verify_failure: bool,
    pub runtime: PaymentRuntimeConfig,
}

impl MidtransConfig {
    pub fn from_settings(
        settings: &SettingsSnapshot,
        runtime: &PaymentRuntimeConfig,
    ) -> PaymentResult<Self> {
        let server_key = settings.get_string("MIDTRANS_SERVER_KEY");
        if server_key.is_empty() {
            return Err(PaymentError::configuration(
                GatewayName::Midtrans.as_str(),
                "MIDTRANS_SERVER_KEY is not configured",
            ));
        }
        let is_production = settings.get_bool("MIDTRANS_IS_PRODUCTION", false);
        let (snap, api) = if is_production {
            (PRODUCTION_SNAP_URL, PRODUCTION_API_URL)
        } else {
            (SANDBOX_SNAP_URL, SANDBOX_API_URL)
        };

        Ok(Self {
            server_key,
            client_key: settings.get("MIDTRANS_CLIENT_KEY").map(str::to_string),
            is_production,
            snap_base_url: settings
                .get("MIDTRANS_SNAP_BASE_URL")
                .unwrap_or(snap)
                .trim_end_matches('/')
                .to_string(),
            api_base_url: settings
                .get("MIDTRANS_API_BASE_URL")
                .unwrap_or(api)
                .trim_end_matches('/')
                .to_string(),
            expiry_minutes: settings.get_u64("MIDTRANS_EXPIRY_MINUTES", 60),
            trust_payload_on_verify_failure: runtime.trust_payload_on_verify_failure,
            runtime: runtime.clone(),
        })
    }
}

/// Snap checkout plus Core API status/cancel.
pub struct MidtransGateway {
    config: MidtransConfig,
    http: PaymentHttpClient,
}

impl MidtransGateway {
    pub fn new(config: MidtransConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(config.runtime.request_timeout)?;
        Ok(Self { config, http })
    }

    fn auth(&self) -> HttpAuth<'_> {
        HttpAuth::Basic {
            username: &self.config.server_key,
            password: "",
        }
    }

    fn api(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url, path)
    }

    async fn fetch_status(&self, order_id: &str) -> PaymentResult<MidtransStatusResponse> {
        self.http
            .request_json(
                GatewayName::Midtrans.as_str(),
                Method::GET,
                &self.api(&format!("/v2/{}/status", order_id)),
                self.auth(),
                HttpBody::Empty,
                &[("Accept", "application/json")],
            )
            .await
    }
}

/// Maps `enabled_payments` codes; unknown codes pass through lower-cased.
pub fn enabled_payment_code(method: &str) -> String {
    match method.trim().to_uppercase().replace(['-', '_', ' '], "").as_str() {
        "" | "QRIS" | "OTHERQRIS" => "other_qris".to_string(),
        "BCAVA" => "bca_va".to_string(),
        "BNIVA" => "bni_va".to_string(),
        "BRIVA" => "bri_va".to_string(),
        "PERMATAVA" => "permata_va".to_string(),
        "MANDIRIVA" | "ECHANNEL" => "echannel".to_string(),
        "CIMBVA" => "cimb_va".to_string(),
        "GOPAY" => "gopay".to_string(),
        "SHOPEEPAY" => "shopeepay".to_string(),
        _ => method.trim().to_lowercase(),
    }
}

/// Midtrans `transaction_status` (+ `fraud_status` for card captures).
pub fn map_midtrans_status(transaction_status: &str, fraud_status: Option<&str>) -> TransactionStatus {
    match transaction_status {
        "capture" => match fraud_status {
            Some("challenge") => TransactionStatus::Pending,
            Some("deny") => TransactionStatus::Failed,
            _ => TransactionStatus::Success,
        },
        "settlement" => TransactionStatus::Success,
        "pending" | "authorize" => TransactionStatus::Pending,
        "deny" | "failure" => TransactionStatus::Failed,
        "cancel" => TransactionStatus::Cancelled,
        "expire" => TransactionStatus::Expired,
        "refund" | "partial_refund" | "chargeback" | "partial_chargeback" => {
            TransactionStatus::Refunded
        }
        _ => TransactionStatus::Unknown,
    }
}

#[derive(Debug, Deserialize)]
struct SnapResponse {
    token: Option<String>,
    redirect_url: Option<String>,
    #[serde(default)]
    error_messages: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct MidtransStatusResponse {
    status_code: Option<String>,
    status_message: Option<String>,
    transaction_id: Option<String>,
    transaction_status: Option<String>,
    fraud_status: Option<String>,
    gross_amount: Option<String>,
    payment_type: Option<String>,
    #[serde(flatten)]
    rest: serde_json::Map<String, JsonValue>,
}

#[async_trait]
impl PaymentGateway for MidtransGateway {
    fn name(&self) -> GatewayName {
        GatewayName::Midtrans
    }

    fn capabilities(&self) -> GatewayCapabilities {
        GatewayCapabilities {
            supports_cancellation: true,
            supports_webhooks: true,
            supports_status_check: true,
        }
    }

    async fn create_transaction(
        &self,
        request: &CreateTransactionRequest,
    ) -> CreateTransactionResult {
        let item_name: String = request.description.chars().take(50).collect();
        let payment_code = enabled_payment_code(&request.payment_method);
        let payload = json!({
            "transaction_details": {
                "order_id": request.order_id,
                "gross_amount": request.amount,
            },
            "customer_details": {
                "first_name": request.customer.name,
                "email": request.customer.email,
                "phone": request.customer.phone,
            },
            "item_details": [{
                "id": "premium-lifetime",
                "price": request.amount,
                "quantity": 1,
                "name": item_name,
            }],
            "enabled_payments": [payment_code],
            "callbacks": {
                "finish": request.callbacks.success,
                "error": request.callbacks.failure,
            },
            "custom_expiry": {
                "expiry_duration": self.config.expiry_minutes,
                "unit": "minute",
            },
        });

        debug!(order_id = %request.order_id, payload = %redact_json(&payload), "midtrans snap request");

        let url = format!("{}/snap/v1/transactions", self.config.snap_base_url);
        let response: PaymentResult<SnapResponse> = self
            .http
            .request_json(
                GatewayName::Midtrans.as_str(),
                Method::POST,
                &url,
                self.auth(),
                HttpBody::Json(&payload),
                &[
                    ("Accept", "application/json"),
                    ("X-Override-Notification", request.callbacks.webhook.as_str()),
                ],
            )
            .await;

        match response {
            Ok(SnapResponse {
                token: Some(token),
                redirect_url: Some(redirect_url),
                ..
            }) => {
                info!(order_id = %request.order_id, "midtrans snap transaction created");
                CreateTransactionResult::created(
                    redirect_url.clone(),
                    Some(token.clone()),
                    json!({
                        "redirect_url": redirect_url,
                        "gateway_reference": token,
                        "snap_token": token,
                        "enabled_payments": [payment_code],
                    }),
                )
            }
            Ok(snap) => {
                let message = if snap.error_messages.is_empty() {
                    "midtrans returned no redirect_url".to_string()
                } else {
                    snap.error_messages.join("; ")
                };
                warn!(order_id = %request.order_id, error = %message, "midtrans snap rejected");
                CreateTransactionResult::failed(message)
            }
            Err(e) => {
                warn!(order_id = %request.order_id, error = %e, "midtrans snap request failed");
                CreateTransactionResult::failed(e.to_string())
            }
        }
    }

    async fn verify_transaction(&self, request: &StatusRequest) -> VerifyTransactionResult {
        let status = match self.fetch_status(&request.order_id).await {
            Ok(status) => status,
            Err(e) => {
                warn!(order_id = %request.order_id, error = %e, "midtrans status check failed");
                return VerifyTransactionResult::invalid(e.to_string());
            }
        };

        if status.status_code.as_deref() == Some("404") {
            return VerifyTransactionResult::invalid(
                status
                    .status_message
                    .unwrap_or_else(|| "transaction not found at midtrans".to_string()),
            );
        }

        let mapped = map_midtrans_status(
            status.transaction_status.as_deref().unwrap_or_default(),
            status.fraud_status.as_deref(),
        );
        let mut details = JsonValue::Object(status.rest);
        details["transaction_status"] = json!(status.transaction_status);
        details["fraud_status"] = json!(status.fraud_status);
        details["midtrans_transaction_id"] = json!(status.transaction_id);
        details["status_code"] = json!(status.status_code);

        VerifyTransactionResult {
            amount: status.gross_amount.as_deref().and_then(parse_idr_amount),
            payment_method: status.payment_type,
            ..VerifyTransactionResult::verified(mapped, details)
        }
    }

    async fn authenticate_notification(
        &self,
        request: &WebhookRequest,
    ) -> PaymentResult<WebhookVerificationResult> {
        let payload = &request.payload;
        let (Some(order_id), Some(status_code), Some(gross_amount), Some(signature)) = (
            json_str(payload, "order_id"),
            json_str(payload, "status_code"),
            json_str(payload, "gross_amount"),
            json_str(payload, "signature_key"),
        ) else {
            return Ok(WebhookVerificationResult::rejected(
                "notification is missing order_id, status_code, gross_amount or signature_key",
            ));
        };

        let expected = midtrans_notification_signature(
            &order_id,
            &status_code,
            &gross_amount,
            &self.config.server_key,
        );
        if verify_hex_digest(&expected, &signature) {
            Ok(WebhookVerificationResult::accepted())
        } else {
            Ok(WebhookVerificationResult::rejected("signature_key mismatch"))
        }
    }

    async fn handle_notification(&self, payload: &JsonValue) -> PaymentResult<NotificationResult> {
        let order_id = json_str(payload, "order_id").ok_or_else(|| PaymentError::ValidationError {
            message: "midtrans notification has no order_id".to_string(),
            field: Some("order_id".to_string()),
        })?;
        let transaction_status = json_str(payload, "transaction_status").unwrap_or_default();
        let fraud_status = json_str(payload, "fraud_status");
        let status = map_midtrans_status(&transaction_status, fraud_status.as_deref());

        let claimed = NotificationResult {
            order_id: order_id.clone(),
            status,
            is_success: status == TransactionStatus::Success,
            amount: json_str(payload, "gross_amount")
                .as_deref()
                .and_then(parse_idr_amount),
            payment_method: json_str(payload, "payment_type"),
            details: redact_json(payload),
            event_type: Some(transaction_status),
        };

        let verified = self.verify_transaction(&StatusRequest::for_order(order_id)).await;
        trust_but_verify(
            GatewayName::Midtrans,
            claimed,
            verified,
            self.config.trust_payload_on_verify_failure,
        )
    }

    async fn cancel_transaction(&self, reference: &str) -> CancelTransactionResult {
        let response: PaymentResult<MidtransStatusResponse> = self
            .http
            .request_json(
                GatewayName::Midtrans.as_str(),
                Method::POST,
                &self.api(&format!("/v2/{}/cancel", reference)),
                self.auth(),
                HttpBody::Empty,
                &[("Accept", "application/json")],
            )
            .await;

        match response {
            Ok(body) if body.status_code.as_deref() == Some("200") => {
                info!(order_id = %reference, "midtrans transaction cancelled");
                CancelTransactionResult {
                    success: true,
                    remote_cancelled: true,
                    message: body.status_message,
                    error: None,
                }
            }
            Ok(body) if body.status_code.as_deref() == Some("412") => CancelTransactionResult {
                success: false,
                remote_cancelled: false,
                message: None,
                error: Some(format!(
                    "midtrans refused cancellation: {}",
                    body.status_message
                        .unwrap_or_else(|| "transaction can no longer be cancelled".to_string())
                )),
            },
            Ok(body) => CancelTransactionResult {
                success: false,
                remote_cancelled: false,
                message: None,
                error: Some(format!(
                    "midtrans cancel returned status_code {}: {}",
                    body.status_code.unwrap_or_default(),
                    body.status_message.unwrap_or_default()
                )),
            },
            Err(e) => CancelTransactionResult {
                success: false,
                remote_cancelled: false,
                message: None,
                error: Some(e.to_string()),
            },
        }
    }

    /// The core API cancels by merchant order id; the Snap token is not known there.
    fn cancel_reference<'a>(&self, order_id: &'a str, _details: &'a JsonValue) -> &'a str {
        order_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_respects_fraud_status() {
        assert_eq!(
            map_midtrans_status("capture", Some("accept")),
            TransactionStatus::Success
        );
        assert_eq!(
            map_midtrans_status("capture", Some("challenge")),
            TransactionStatus::Pending
        );
        assert_eq!(map_midtrans_status("capture", None), TransactionStatus::Success);
    }

    #[test]
    fn status_vocabulary_is_fully_mapped() {
        assert_eq!(map_midtrans_status("settlement", None), TransactionStatus::Success);
        assert_eq!(map_midtrans_status("expire", None), TransactionStatus::Expired);
        assert_eq!(map_midtrans_status("cancel", None), TransactionStatus::Cancelled);
        assert_eq!(map_midtrans_status("deny", None), TransactionStatus::Failed);
        assert_eq!(map_midtrans_status("partial_refund", None), TransactionStatus::Refunded);
        assert_eq!(map_midtrans_status("whatever", None), TransactionStatus::Unknown);
    }

    #[test]
    fn payment_codes_normalise() {
        assert_eq!(enabled_payment_code(""), "other_qris");
        assert_eq!(enabled_payment_code("bca-va"), "bca_va");
        assert_eq!(enabled_payment_code("GoPay"), "gopay");
        assert_eq!(enabled_payment_code("akulaku"), "akulaku");
    }

    #[test]
    fn missing_server_key_is_a_configuration_error() {
        let settings = SettingsSnapshot::from_pairs(
            Vec::<(String, String)>::new(),
            Vec::<(String, String)>::new(),
        );
        let err = MidtransConfig::from_settings(&settings, &PaymentRuntimeConfig::default())
            .unwrap_err();
        assert!(matches!(err, PaymentError::ConfigurationError { .. }));
    }

    #[test]
    fn production_toggle_switches_base_urls() {
        let settings = SettingsSnapshot::from_pairs(
            [("MIDTRANS_SERVER_KEY", "SB-Mid-server-x"), ("MIDTRANS_IS_PRODUCTION", "true")],
            Vec::<(String, String)>::new(),
        );
        let config =
            MidtransConfig::from_settings(&settings, &PaymentRuntimeConfig::default()).unwrap();
        assert_eq!(config.api_base_url, PRODUCTION_API_URL);
        assert_eq!(config.snap_base_url, PRODUCTION_SNAP_URL);
    }
}
