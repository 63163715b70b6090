use crate::config::PaymentRuntimeConfig;
use crate::logging::redact_json;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::gateway::{trust_but_verify, PaymentGateway};
use crate::payments::providers::paypal_webhook::{
    CertificateFetcher, HttpCertificateFetcher, PaypalWebhookVerifier,
};
use crate::payments::retry::{is_transient, with_retry, RetryPolicy};
use crate::payments::settings::SettingsSnapshot;
use crate::payments::types::{
    json_str, CreateTransactionRequest, CreateTransactionResult, GatewayCapabilities, GatewayName,
    NotificationResult, StatusRequest, TransactionStatus, VerifyTransactionResult, WebhookRequest,
    WebhookVerificationResult,
};
use crate::payments::utils::{HttpAuth, HttpBody, PaymentHttpClient};
use crate::services::notification::{AdminAlert, AdminAlertEmitter};
use async_trait::async_trait;
use reqwest::Method;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

const SANDBOX_URL: &str = "https://api-m.sandbox.paypal.com";
const PRODUCTION_URL: &str = "https://api-m.paypal.com";
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);
pub const DEFAULT_IDR_PER_USD: i64 = 16_000;

/// IDR to USD, half-up to cents, never below one cent.
pub fn idr_to_usd(amount_idr: i64, idr_per_usd: Decimal) -> Decimal {
    let minimum = Decimal::new(1, 2);
    if idr_per_usd <= Decimal::ZERO {
        return minimum;
    }
    let usd = (Decimal::from(amount_idr) / idr_per_usd)
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    usd.max(minimum)
}

/// Formats a USD amount the way PayPal expects (`"6.19"`).
pub fn format_usd(usd: Decimal) -> String {
    format!("{:.2}", usd)
}

#[derive(Debug, Clone)]
pub struct PaypalConfig {
    pub client_id: String,
    pub client_secret: String,
    pub webhook_id: String,
    pub is_production: bool,
    pub base_url: String,
    pub idr_per_usd: Decimal,
    pub brand_name: String,
    pub allow_unverified_sandbox_webhooks: bool,
    pub retry: RetryPolicy,
    pub trust_payload_on_verify_failure: bool,
    pub runtime: PaymentRuntimeConfig,
}

impl PaypalConfig {
    pub fn from_settings(
        settings: &SettingsSnapshot,
        runtime: &PaymentRuntimeConfig,
    ) -> PaymentResult<Self> {
        let client_id = settings.get_string("PAYPAL_CLIENT_ID");
        let client_secret = settings.get_string("PAYPAL_CLIENT_SECRET");
        if client_id.is_empty() || client_secret.is_empty() {
            return Err(PaymentError::configuration(
                GatewayName::Paypal.as_str(),
                "PAYPAL_CLIENT_ID and PAYPAL_CLIENT_SECRET must both be configured",
            ));
        }
        let is_production = settings.get_bool("PAYPAL_IS_PRODUCTION", false);
        let webhook_id = settings.get_string("PAYPAL_WEBHOOK_ID");
        if is_production && webhook_id.is_empty() {
            return Err(PaymentError::configuration(
                GatewayName::Paypal.as_str(),
                "PAYPAL_WEBHOOK_ID is required in production",
            ));
        }
        let default_url = if is_production {
            PRODUCTION_URL
        } else {
            SANDBOX_URL
        };

        Ok(Self {
            client_id,
            client_secret,
            webhook_id,
            is_production,
            base_url: settings
                .get("PAYPAL_BASE_URL")
                .unwrap_or(default_url)
                .trim_end_matches('/')
                .to_string(),
            idr_per_usd: settings
                .get_decimal("PAYPAL_IDR_PER_USD", Decimal::from(DEFAULT_IDR_PER_USD)),
            brand_name: settings
                .get("PAYPAL_BRAND_NAME")
                .unwrap_or("Premium")
                .to_string(),
            allow_unverified_sandbox_webhooks: settings
                .get_bool("PAYPAL_ALLOW_UNVERIFIED_SANDBOX_WEBHOOKS", false),
            retry: RetryPolicy::from_env("PAYPAL"),
            trust_payload_on_verify_failure: runtime.trust_payload_on_verify_failure,
            runtime: runtime.clone(),
        })
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct PaypalLink {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
struct PaypalOrder {
    id: String,
    status: String,
    #[serde(default)]
    links: Vec<PaypalLink>,
    #[serde(default)]
    purchase_units: Vec<JsonValue>,
}

impl PaypalOrder {
    fn link(&self, rel: &str) -> Option<&str> {
        self.links
            .iter()
            .find(|l| l.rel.eq_ignore_ascii_case(rel))
            .map(|l| l.href.as_str())
    }

    fn first_capture(&self) -> Option<&JsonValue> {
        self.purchase_units
            .first()?
            .pointer("/payments/captures/0")
    }

    fn details(&self) -> JsonValue {
        let capture = self.first_capture();
        json!({
            "paypal_order_id": self.id,
            "paypal_order_status": self.status,
            "capture_id": capture.and_then(|c| c.get("id")).cloned(),
            "capture_status": capture.and_then(|c| c.get("status")).cloned(),
            "usd_amount": capture.and_then(|c| c.pointer("/amount/value")).cloned(),
        })
    }
}

/// Capture status, for completed orders and `PAYMENT.CAPTURE.*` resources.
pub fn map_capture_status(status: &str) -> TransactionStatus {
    match status.to_uppercase().as_str() {
        "COMPLETED" => TransactionStatus::Success,
        "PENDING" => TransactionStatus::Pending,
        "DECLINED" | "FAILED" => TransactionStatus::Failed,
        "REFUNDED" | "PARTIALLY_REFUNDED" | "REVERSED" => TransactionStatus::Refunded,
        _ => TransactionStatus::Unknown,
    }
}

/// Order status; a completed order defers to its first capture.
fn map_order_status(order: &PaypalOrder) -> TransactionStatus {
    match order.status.to_uppercase().as_str() {
        "CREATED" | "SAVED" | "APPROVED" | "PAYER_ACTION_REQUIRED" => TransactionStatus::Pending,
        "COMPLETED" => order
            .first_capture()
            .and_then(|c| c.get("status"))
            .and_then(|s| s.as_str())
            .map(map_capture_status)
            .unwrap_or(TransactionStatus::Success),
        "VOIDED" => TransactionStatus::Cancelled,
        _ => TransactionStatus::Unknown,
    }
}

/// Webhook `event_type` to the status it claims.
pub fn map_event_type(event_type: &str) -> TransactionStatus {
    match event_type {
        "CHECKOUT.ORDER.APPROVED" | "PAYMENT.CAPTURE.PENDING" => TransactionStatus::Pending,
        "CHECKOUT.ORDER.COMPLETED" | "PAYMENT.CAPTURE.COMPLETED" => TransactionStatus::Success,
        "PAYMENT.CAPTURE.DENIED" | "PAYMENT.CAPTURE.DECLINED" => TransactionStatus::Failed,
        "PAYMENT.CAPTURE.REFUNDED" | "PAYMENT.CAPTURE.REVERSED" => TransactionStatus::Refunded,
        "CHECKOUT.ORDER.VOIDED" => TransactionStatus::Cancelled,
        _ => TransactionStatus::Unknown,
    }
}

/// Orders API v2 with client-credentials OAuth.
pub struct PaypalGateway {
    config: PaypalConfig,
    http: PaymentHttpClient,
    token: RwLock<Option<CachedToken>>,
    verifier: PaypalWebhookVerifier,
    alerts: Option<AdminAlertEmitter>,
}

impl PaypalGateway {
    pub fn new(config: PaypalConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(config.runtime.request_timeout)?;
        let fetcher = Arc::new(HttpCertificateFetcher::new(http.clone()));
        Ok(Self::with_certificate_fetcher(config, http, fetcher))
    }

    pub fn with_certificate_fetcher(
        config: PaypalConfig,
        http: PaymentHttpClient,
        fetcher: Arc<dyn CertificateFetcher>,
    ) -> Self {
        let verifier = PaypalWebhookVerifier::new(
            config.webhook_id.clone(),
            config.is_production,
            config.allow_unverified_sandbox_webhooks,
            fetcher,
        );
        Self {
            config,
            http,
            token: RwLock::new(None),
            verifier,
            alerts: None,
        }
    }

    pub fn with_alerts(mut self, alerts: AdminAlertEmitter) -> Self {
        self.alerts = Some(alerts);
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    async fn access_token(&self) -> PaymentResult<String> {
        if let Some(cached) = self.token.read().await.as_ref() {
            if cached.expires_at > Instant::now() + TOKEN_REFRESH_MARGIN {
                return Ok(cached.access_token.clone());
            }
        }

        let mut slot = self.token.write().await;
        if let Some(cached) = slot.as_ref() {
            if cached.expires_at > Instant::now() + TOKEN_REFRESH_MARGIN {
                return Ok(cached.access_token.clone());
            }
        }

        let response: TokenResponse = self
            .http
            .request_json(
                GatewayName::Paypal.as_str(),
                Method::POST,
                &self.endpoint("/v1/oauth2/token"),
                HttpAuth::Basic {
                    username: &self.config.client_id,
                    password: &self.config.client_secret,
                },
                HttpBody::Form("grant_type=client_credentials"),
                &[("Accept", "application/json")],
            )
            .await?;

        debug!(expires_in = response.expires_in, "paypal access token refreshed");
        *slot = Some(CachedToken {
            access_token: response.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(response.expires_in),
        });
        Ok(response.access_token)
    }

    async fn get_order(&self, paypal_order_id: &str) -> PaymentResult<PaypalOrder> {
        let token = self.access_token().await?;
        self.http
            .request_json(
                GatewayName::Paypal.as_str(),
                Method::GET,
                &self.endpoint(&format!("/v2/checkout/orders/{}", paypal_order_id)),
                HttpAuth::Bearer(&token),
                HttpBody::Empty,
                &[("Accept", "application/json")],
            )
            .await
    }

    async fn capture_order(&self, paypal_order_id: &str) -> PaymentResult<PaypalOrder> {
        let token = self.access_token().await?;
        let request_id = format!("capture-{}", paypal_order_id);
        self.http
            .request_json(
                GatewayName::Paypal.as_str(),
                Method::POST,
                &self.endpoint(&format!("/v2/checkout/orders/{}/capture", paypal_order_id)),
                HttpAuth::Bearer(&token),
                HttpBody::Json(&json!({})),
                &[
                    ("Accept", "application/json"),
                    ("Prefer", "return=representation"),
                    ("PayPal-Request-Id", request_id.as_str()),
                ],
            )
            .await
    }

    /// Fetches the order, capturing it first if the buyer has approved it.
    async fn fetch_and_capture(&self, paypal_order_id: &str) -> PaymentResult<PaypalOrder> {
        let order = self.get_order(paypal_order_id).await?;
        if !order.status.eq_ignore_ascii_case("APPROVED") {
            return Ok(order);
        }
        match self.capture_order(paypal_order_id).await {
            Ok(captured) => {
                info!(paypal_order_id = %paypal_order_id, status = %captured.status, "paypal order captured");
                Ok(captured)
            }
            Err(e) if e.to_string().contains("ORDER_ALREADY_CAPTURED") => {
                self.get_order(paypal_order_id).await
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl PaymentGateway for PaypalGateway {
    fn name(&self) -> GatewayName {
        GatewayName::Paypal
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
        let usd = format_usd(idr_to_usd(request.amount, self.config.idr_per_usd));
        let description: String = request.description.chars().take(127).collect();
        let payload = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": request.order_id,
                "custom_id": request.order_id,
                "invoice_id": request.order_id,
                "description": description,
                "amount": {"currency_code": "USD", "value": usd},
            }],
            "application_context": {
                "brand_name": self.config.brand_name,
                "return_url": request.callbacks.success,
                "cancel_url": request.callbacks.failure,
                "user_action": "PAY_NOW",
                "shipping_preference": "NO_SHIPPING",
            },
        });

        let token = match self.access_token().await {
            Ok(token) => token,
            Err(e) => {
                warn!(order_id = %request.order_id, error = %e, "paypal token request failed");
                return CreateTransactionResult::failed(e.to_string());
            }
        };

        let response: PaymentResult<PaypalOrder> = self
            .http
            .request_json(
                GatewayName::Paypal.as_str(),
                Method::POST,
                &self.endpoint("/v2/checkout/orders"),
                HttpAuth::Bearer(&token),
                HttpBody::Json(&payload),
                &[
                    ("Accept", "application/json"),
                    ("Prefer", "return=representation"),
                    ("PayPal-Request-Id", request.order_id.as_str()),
                ],
            )
            .await;

        match response {
            Ok(order) => match order.link("approve").or_else(|| order.link("payer-action")) {
                Some(approve) => {
                    info!(order_id = %request.order_id, paypal_order_id = %order.id, usd = %usd, "paypal order created");
                    CreateTransactionResult::created(
                        approve.to_string(),
                        Some(order.id.clone()),
                        json!({
                            "redirect_url": approve,
                            "gateway_reference": order.id,
                            "paypal_order_id": order.id,
                            "usd_amount": usd,
                            "idr_per_usd": self.config.idr_per_usd.to_string(),
                        }),
                    )
                }
                None => CreateTransactionResult::failed(format!(
                    "paypal order {} has no approval link",
                    order.id
                )),
            },
            Err(e) => {
                warn!(order_id = %request.order_id, error = %e, "paypal order creation failed");
                CreateTransactionResult::failed(e.to_string())
            }
        }
    }

    async fn verify_transaction(&self, request: &StatusRequest) -> VerifyTransactionResult {
        let Some(paypal_order_id) = request.gateway_reference.as_deref() else {
            return VerifyTransactionResult::invalid(format!(
                "no paypal order id recorded for {}",
                request.order_id
            ));
        };

        let outcome = with_retry(
            &self.config.retry,
            |_| self.fetch_and_capture(paypal_order_id),
            is_transient,
            |retry| {
                warn!(
                    order_id = %request.order_id,
                    attempt = retry.attempt,
                    delay_ms = retry.delay.as_millis() as u64,
                    error = %retry.error,
                    "paypal status check failed, retrying"
                );
            },
        )
        .await;

        match outcome {
            Ok(order) => {
                let status = map_order_status(&order);
                VerifyTransactionResult {
                    payment_method: Some("paypal".to_string()),
                    ..VerifyTransactionResult::verified(status, order.details())
                }
            }
            Err(e) => {
                if is_transient(&e) {
                    error!(order_id = %request.order_id, error = %e, "paypal status check exhausted retries");
                    if let Some(alerts) = &self.alerts {
                        alerts.emit(AdminAlert::critical(
                            "paypal_status_unavailable",
                            format!("PayPal status check failed after retries for {}", request.order_id),
                            json!({
                                "order_id": request.order_id,
                                "paypal_order_id": paypal_order_id,
                                "error": e.to_string(),
                            }),
                        ));
                    }
                } else {
                    warn!(order_id = %request.order_id, error = %e, "paypal status check failed");
                }
                VerifyTransactionResult::invalid(e.to_string())
            }
        }
    }

    async fn authenticate_notification(
        &self,
        request: &WebhookRequest,
    ) -> PaymentResult<WebhookVerificationResult> {
        self.verifier.verify(request).await
    }

    async fn handle_notification(&self, payload: &JsonValue) -> PaymentResult<NotificationResult> {
        let event_type = json_str(payload, "event_type").unwrap_or_default();
        let resource = payload.get("resource").cloned().unwrap_or(JsonValue::Null);

        let order_id = json_str(&resource, "custom_id")
            .or_else(|| {
                resource
                    .pointer("/purchase_units/0")
                    .and_then(|unit| json_str(unit, "custom_id").or_else(|| json_str(unit, "reference_id")))
            })
            .or_else(|| json_str(&resource, "invoice_id"))
            .ok_or_else(|| PaymentError::ValidationError {
                message: format!("paypal event {} carries no order reference", event_type),
                field: Some("resource.custom_id".to_string()),
            })?;

        let paypal_order_id = if event_type.starts_with("CHECKOUT.ORDER.") {
            json_str(&resource, "id")
        } else {
            resource
                .pointer("/supplementary_data/related_ids/order_id")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };

        let status = map_event_type(&event_type);
        let claimed = NotificationResult {
            order_id: order_id.clone(),
            status,
            is_success: status == TransactionStatus::Success,
            amount: None,
            payment_method: Some("paypal".to_string()),
            details: json!({
                "event_id": json_str(payload, "id"),
                "event_type": event_type,
                "paypal_order_id": paypal_order_id,
                "resource": redact_json(&resource),
            }),
            event_type: Some(event_type.clone()),
        };

        let verified = match paypal_order_id {
            Some(id) => {
                self.verify_transaction(&StatusRequest {
                    order_id,
                    gateway_reference: Some(id),
                })
                .await
            }
            None => VerifyTransactionResult::invalid("event has no paypal order id"),
        };
        trust_but_verify(
            GatewayName::Paypal,
            claimed,
            verified,
            self.config.trust_payload_on_verify_failure,
        )
    }

    fn gateway_reference<'a>(&self, details: &'a JsonValue) -> Option<&'a str> {
        details
            .get("paypal_order_id")
            .or_else(|| details.get("gateway_reference"))
            .and_then(|v| v.as_str())
    }
}
