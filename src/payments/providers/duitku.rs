use crate::config::PaymentRuntimeConfig;
use crate::logging::redact_json;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::gateway::{trust_but_verify, PaymentGateway};
use crate::payments::retry::{is_transient, with_retry, RetryPolicy};
use crate::payments::settings::SettingsSnapshot;
use crate::payments::signature::{
    duitku_callback_signature, duitku_inquiry_signature, duitku_status_signature,
    verify_hex_digest,
};
use crate::payments::types::{
    json_str, parse_idr_amount, CreateTransactionRequest, CreateTransactionResult,
    GatewayCapabilities, GatewayName, NotificationResult, StatusRequest, TransactionStatus,
    VerifyTransactionResult, WebhookRequest, WebhookVerificationResult,
};
use crate::payments::utils::{HttpAuth, HttpBody, PaymentHttpClient};
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

const SANDBOX_URL: &str = "https://sandbox.duitku.com";
const PRODUCTION_URL: &str = "https://passport.duitku.com";

#[derive(Debug, Clone)]
pub struct DuitkuConfig {
    pub merchant_code: String,
    pub api_key: String,
    pub is_production: bool,
    pub base_url: String,
    pub expiry_minutes: u64,
    pub retry: RetryPolicy,
    pub trust_payload_on_verify_failure: bool,
    pub runtime: PaymentRuntimeConfig,
}

impl DuitkuConfig {
    pub fn from_settings(
        settings: &SettingsSnapshot,
        runtime: &PaymentRuntimeConfig,
    ) -> PaymentResult<Self> {
        let merchant_code = settings.get_string("DUITKU_MERCHANT_CODE");
        let api_key = settings.get_string("DUITKU_API_KEY");
        if merchant_code.is_empty() || api_key.is_empty() {
            return Err(PaymentError::configuration(
                GatewayName::Duitku.as_str(),
                "DUITKU_MERCHANT_CODE and DUITKU_API_KEY must both be configured",
            ));
        }
        let is_production = settings.get_bool("DUITKU_IS_PRODUCTION", false);
        let default_url = if is_production {
            PRODUCTION_URL
        } else {
            SANDBOX_URL
        };

        Ok(Self {
            merchant_code,
            api_key,
            is_production,
            base_url: settings
                .get("DUITKU_BASE_URL")
                .unwrap_or(default_url)
                .trim_end_matches('/')
                .to_string(),
            expiry_minutes: settings.get_u64("DUITKU_EXPIRY_MINUTES", 60),
            retry: RetryPolicy::from_env("DUITKU"),
            trust_payload_on_verify_failure: runtime.trust_payload_on_verify_failure,
            runtime: runtime.clone(),
        })
    }
}

pub struct DuitkuGateway {
    config: DuitkuConfig,
    http: PaymentHttpClient,
}

/// Duitku two-letter payment method codes.
pub fn duitku_method_code(method: &str) -> String {
    match method.trim().to_uppercase().replace(['-', '_', ' '], "").as_str() {
        "" | "QRIS" => "SP".to_string(),
        "BCAVA" => "BC".to_string(),
        "MANDIRIVA" => "M2".to_string(),
        "BNIVA" => "I1".to_string(),
        "BRIVA" => "BR".to_string(),
        "PERMATAVA" => "BT".to_string(),
        "CIMBVA" => "B1".to_string(),
        "OVO" => "OV".to_string(),
        "DANA" => "DA".to_string(),
        other => other.to_string(),
    }
}

/// Status-check `statusCode`.
pub fn map_duitku_status(status_code: &str) -> TransactionStatus {
    match status_code {
        "00" => TransactionStatus::Success,
        "01" => TransactionStatus::Pending,
        "02" => TransactionStatus::Failed,
        _ => TransactionStatus::Unknown,
    }
}

/// Callback `resultCode`.
fn map_callback_result(result_code: &str) -> TransactionStatus {
    match result_code {
        "00" => TransactionStatus::Success,
        "01" => TransactionStatus::Failed,
        _ => TransactionStatus::Unknown,
    }
}

/// True when Duitku refused the request because of `expiryPeriod`.
fn rejects_expiry_period(error: &PaymentError) -> bool {
    let text = error.to_string().to_lowercase();
    text.contains("expiryperiod") || text.contains("expiry period")
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InquiryResponse {
    reference: Option<String>,
    payment_url: Option<String>,
    va_number: Option<String>,
    qr_string: Option<String>,
    status_code: Option<String>,
    status_message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    merchant_order_id: Option<String>,
    reference: Option<String>,
    amount: Option<String>,
    status_code: Option<String>,
    status_message: Option<String>,
}

impl DuitkuGateway {
    pub fn new(config: DuitkuConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(config.runtime.request_timeout)?;
        Ok(Self { config, http })
    }

    fn inquiry_payload(&self, request: &CreateTransactionRequest, with_expiry: bool) -> JsonValue {
        let signature = duitku_inquiry_signature(
            &self.config.merchant_code,
            &request.order_id,
            request.amount,
            &self.config.api_key,
        );
        let product: String = request.description.chars().take(255).collect();
        let phone = request.customer.phone.clone().unwrap_or_default();

        let mut payload = json!({
            "merchantCode": self.config.merchant_code,
            "paymentAmount": request.amount,
            "paymentMethod": duitku_method_code(&request.payment_method),
            "merchantOrderId": request.order_id,
            "productDetails": product,
            "email": request.customer.email,
            "phoneNumber": phone,
            "customerVaName": request.customer.name,
            "merchantUserInfo": request.customer.user_id.to_string(),
            "callbackUrl": request.callbacks.webhook,
            "returnUrl": request.callbacks.success,
            "signature": signature,
            "itemDetails": [{
                "name": product,
                "price": request.amount,
                "quantity": 1,
            }],
            "customerDetail": {
                "firstName": request.customer.name,
                "email": request.customer.email,
                "phoneNumber": phone,
            },
        });
        if with_expiry {
            payload["expiryPeriod"] = json!(self.config.expiry_minutes);
        }
        payload
    }
}

#[async_trait]
impl PaymentGateway for DuitkuGateway {
    fn name(&self) -> GatewayName {
        GatewayName::Duitku
    }

    fn capabilities(&self) -> GatewayCapabilities {
        GatewayCapabilities {
            supports_cancellation: false,
            supports_webhooks: true,
            supports_status_check: true,
        }
    }

    async fn create_transaction(
        &self,
        request: &CreateTransactionRequest,
    ) -> CreateTransactionResult {
        let url = format!("{}/webapi/api/merchant/v2/inquiry", self.config.base_url);
        let drop_expiry = AtomicBool::new(false);
        let http = &self.http;

        let outcome: PaymentResult<InquiryResponse> = with_retry(
            &self.config.retry,
            |attempt| {
                let payload = self.inquiry_payload(request, !drop_expiry.load(Ordering::SeqCst));
                debug!(
                    order_id = %request.order_id,
                    attempt,
                    payload = %redact_json(&payload),
                    "duitku inquiry request"
                );
                let url = url.clone();
                async move {
                    http.request_json(
                        GatewayName::Duitku.as_str(),
                        Method::POST,
                        &url,
                        HttpAuth::None,
                        HttpBody::Json(&payload),
                        &[("Accept", "application/json")],
                    )
                    .await
                }
            },
            |e| is_transient(e) || (rejects_expiry_period(e) && !drop_expiry.load(Ordering::SeqCst)),
            |retry| {
                if rejects_expiry_period(retry.error) {
                    drop_expiry.store(true, Ordering::SeqCst);
                }
                warn!(
                    order_id = %request.order_id,
                    attempt = retry.attempt,
                    delay_ms = retry.delay.as_millis() as u64,
                    error = %retry.error,
                    expiry_dropped = drop_expiry.load(Ordering::SeqCst),
                    "duitku inquiry failed, retrying"
                );
            },
        )
        .await;

        match outcome {
            Ok(InquiryResponse {
                payment_url: Some(payment_url),
                status_code,
                reference,
                va_number,
                qr_string,
                ..
            }) if status_code.as_deref().unwrap_or("00") == "00" => {
                info!(order_id = %request.order_id, reference = ?reference, "duitku inquiry created");
                CreateTransactionResult::created(
                    payment_url.clone(),
                    reference.clone(),
                    json!({
                        "redirect_url": payment_url,
                        "gateway_reference": reference,
                        "va_number": va_number,
                        "qr_string": qr_string,
                        "expiry_period_sent": !drop_expiry.load(Ordering::SeqCst),
                    }),
                )
            }
            Ok(inquiry) => {
                let message = format!(
                    "duitku inquiry rejected: {} {}",
                    inquiry.status_code.unwrap_or_default(),
                    inquiry.status_message.unwrap_or_default()
                );
                warn!(order_id = %request.order_id, error = %message, "duitku inquiry rejected");
                CreateTransactionResult::failed(message.trim().to_string())
            }
            Err(e) => {
                warn!(order_id = %request.order_id, error = %e, "duitku inquiry failed");
                CreateTransactionResult::failed(e.to_string())
            }
        }
    }

    async fn verify_transaction(&self, request: &StatusRequest) -> VerifyTransactionResult {
        let payload = json!({
            "merchantCode": self.config.merchant_code,
            "merchantOrderId": request.order_id,
            "signature": duitku_status_signature(
                &self.config.merchant_code,
                &request.order_id,
                &self.config.api_key,
            ),
        });
        let url = format!("{}/webapi/api/merchant/transactionStatus", self.config.base_url);

        let response: PaymentResult<StatusResponse> = self
            .http
            .request_json(
                GatewayName::Duitku.as_str(),
                Method::POST,
                &url,
                HttpAuth::None,
                HttpBody::Json(&payload),
                &[("Accept", "application/json")],
            )
            .await;

        match response {
            Ok(status) => {
                let code = status.status_code.unwrap_or_default();
                let mapped = map_duitku_status(&code);
                VerifyTransactionResult {
                    amount: status.amount.as_deref().and_then(parse_idr_amount),
                    ..VerifyTransactionResult::verified(
                        mapped,
                        json!({
                            "status_code": code,
                            "status_message": status.status_message,
                            "reference": status.reference,
                            "merchant_order_id": status.merchant_order_id,
                        }),
                    )
                }
            }
            Err(e) => {
                warn!(order_id = %request.order_id, error = %e, "duitku status check failed");
                VerifyTransactionResult::invalid(e.to_string())
            }
        }
    }

    async fn authenticate_notification(
        &self,
        request: &WebhookRequest,
    ) -> PaymentResult<WebhookVerificationResult> {
        let payload = &request.payload;
        let (Some(merchant_code), Some(amount), Some(order_id), Some(signature)) = (
            json_str(payload, "merchantCode"),
            json_str(payload, "amount"),
            json_str(payload, "merchantOrderId"),
            json_str(payload, "signature"),
        ) else {
            return Ok(WebhookVerificationResult::rejected(
                "callback is missing merchantCode, amount, merchantOrderId or signature",
            ));
        };

        if merchant_code != self.config.merchant_code {
            return Ok(WebhookVerificationResult::rejected("merchantCode mismatch"));
        }

        let expected =
            duitku_callback_signature(&merchant_code, &amount, &order_id, &self.config.api_key);
        if verify_hex_digest(&expected, &signature) {
            Ok(WebhookVerificationResult::accepted())
        } else {
            Ok(WebhookVerificationResult::rejected("signature mismatch"))
        }
    }

    async fn handle_notification(&self, payload: &JsonValue) -> PaymentResult<NotificationResult> {
        let order_id =
            json_str(payload, "merchantOrderId").ok_or_else(|| PaymentError::ValidationError {
                message: "duitku callback has no merchantOrderId".to_string(),
                field: Some("merchantOrderId".to_string()),
            })?;
        let result_code = json_str(payload, "resultCode").unwrap_or_default();
        let status = map_callback_result(&result_code);

        let claimed = NotificationResult {
            order_id: order_id.clone(),
            status,
            is_success: status == TransactionStatus::Success,
            amount: json_str(payload, "amount")
                .as_deref()
                .and_then(parse_idr_amount),
            payment_method: json_str(payload, "paymentCode"),
            details: redact_json(payload),
            event_type: Some(format!("callback:{}", result_code)),
        };

        let verified = self.verify_transaction(&StatusRequest::for_order(order_id)).await;
        trust_but_verify(
            GatewayName::Duitku,
            claimed,
            verified,
            self.config.trust_payload_on_verify_failure,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_codes_map_to_duitku_codes() {
        assert_eq!(duitku_method_code(""), "SP");
        assert_eq!(duitku_method_code("qris"), "SP");
        assert_eq!(duitku_method_code("BCA_VA"), "BC");
        assert_eq!(duitku_method_code("mandiri-va"), "M2");
        assert_eq!(duitku_method_code("VC"), "VC");
    }

    #[test]
    fn status_codes_map() {
        assert_eq!(map_duitku_status("00"), TransactionStatus::Success);
        assert_eq!(map_duitku_status("01"), TransactionStatus::Pending);
        assert_eq!(map_duitku_status("02"), TransactionStatus::Failed);
        assert_eq!(map_duitku_status("99"), TransactionStatus::Unknown);
        assert_eq!(map_callback_result("01"), TransactionStatus::Failed);
    }

    #[test]
    fn expiry_rejections_are_detected() {
        let err = PaymentError::ProviderError {
            provider: "duitku".to_string(),
            message: "HTTP 400: {\"Message\":\"expiryPeriod is invalid\"}".to_string(),
            provider_code: Some("400".to_string()),
            retryable: false,
        };
        assert!(rejects_expiry_period(&err));
        assert!(!rejects_expiry_period(&PaymentError::provider("duitku", "Minimum Payment")));
    }

    #[test]
    fn missing_credentials_fail_construction() {
        let settings = SettingsSnapshot::from_pairs(
            [("DUITKU_MERCHANT_CODE", "D0001")],
            Vec::<(String, String)>::new(),
        );
        assert!(DuitkuConfig::from_settings(&settings, &PaymentRuntimeConfig::default()).is_err());
    }
}
