//! Credential-less PayPal variants: a paypal.me link and the classic
//! `_xclick` checkout link with IPN notifications.

use crate::config::PaymentRuntimeConfig;
use crate::logging::redact_json;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::gateway::PaymentGateway;
use crate::payments::providers::paypal::{format_usd, idr_to_usd, DEFAULT_IDR_PER_USD};
use crate::payments::settings::SettingsSnapshot;
use crate::payments::types::{
    json_str, CreateTransactionRequest, CreateTransactionResult, GatewayCapabilities, GatewayName,
    NotificationResult, StatusRequest, TransactionStatus, VerifyTransactionResult, WebhookRequest,
    WebhookVerificationResult,
};
use crate::payments::utils::{HttpAuth, HttpBody, PaymentHttpClient};
use async_trait::async_trait;
use reqwest::Method;
use rust_decimal::Decimal;
use serde_json::{json, Value as JsonValue};
use tracing::{info, warn};
use url::Url;

// ---------------------------------------------------------------------------
// paypal.me
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PaypalMeConfig {
    pub username: String,
    pub idr_per_usd: Decimal,
}

impl PaypalMeConfig {
    pub fn from_settings(settings: &SettingsSnapshot) -> PaymentResult<Self> {
        let username = settings.get_string("PAYPAL_ME_USERNAME");
        if username.is_empty() {
            return Err(PaymentError::configuration(
                GatewayName::PaypalMe.as_str(),
                "PAYPAL_ME_USERNAME is not configured",
            ));
        }
        Ok(Self {
            username,
            idr_per_usd: settings
                .get_decimal("PAYPAL_IDR_PER_USD", Decimal::from(DEFAULT_IDR_PER_USD)),
        })
    }
}

/// Redirects to `paypal.me/{user}/{amount}USD`. Payments are confirmed by
/// hand, so there is no status API or notification.
pub struct PaypalMeGateway {
    config: PaypalMeConfig,
}

impl PaypalMeGateway {
    pub fn new(config: PaypalMeConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PaymentGateway for PaypalMeGateway {
    fn name(&self) -> GatewayName {
        GatewayName::PaypalMe
    }

    fn capabilities(&self) -> GatewayCapabilities {
        GatewayCapabilities {
            supports_cancellation: false,
            supports_webhooks: false,
            supports_status_check: false,
        }
    }

    async fn create_transaction(
        &self,
        request: &CreateTransactionRequest,
    ) -> CreateTransactionResult {
        let usd = format_usd(idr_to_usd(request.amount, self.config.idr_per_usd));
        let mut url = match Url::parse("https://www.paypal.me/") {
            Ok(url) => url,
            Err(e) => return CreateTransactionResult::failed(e.to_string()),
        };
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.clear().push(&self.config.username).push(&format!("{}USD", usd));
        }

        CreateTransactionResult::created(
            url.to_string(),
            None,
            json!({
                "redirect_url": url.to_string(),
                "usd_amount": usd,
                "manual_confirmation": true,
            }),
        )
    }

    async fn verify_transaction(&self, _request: &StatusRequest) -> VerifyTransactionResult {
        VerifyTransactionResult::invalid("paypal_me payments have no status API")
    }

    async fn authenticate_notification(
        &self,
        _request: &WebhookRequest,
    ) -> PaymentResult<WebhookVerificationResult> {
        Ok(WebhookVerificationResult::rejected(
            "paypal_me does not send notifications",
        ))
    }

    async fn handle_notification(&self, _payload: &JsonValue) -> PaymentResult<NotificationResult> {
        Err(PaymentError::ValidationError {
            message: "paypal_me does not send notifications".to_string(),
            field: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Classic checkout link + IPN
// ---------------------------------------------------------------------------

const SANDBOX_WEBSCR: &str = "https://www.sandbox.paypal.com/cgi-bin/webscr";
const PRODUCTION_WEBSCR: &str = "https://www.paypal.com/cgi-bin/webscr";
const SANDBOX_IPN: &str = "https://ipnpb.sandbox.paypal.com/cgi-bin/webscr";
const PRODUCTION_IPN: &str = "https://ipnpb.paypal.com/cgi-bin/webscr";

#[derive(Debug, Clone)]
pub struct PaypalCheckoutLinkConfig {
    pub business_email: String,
    pub is_production: bool,
    pub checkout_url: String,
    pub ipn_verify_url: String,
    pub idr_per_usd: Decimal,
    pub runtime: PaymentRuntimeConfig,
}

impl PaypalCheckoutLinkConfig {
    pub fn from_settings(
        settings: &SettingsSnapshot,
        runtime: &PaymentRuntimeConfig,
    ) -> PaymentResult<Self> {
        let business_email = settings.get_string("PAYPAL_BUSINESS_EMAIL");
        if business_email.is_empty() {
            return Err(PaymentError::configuration(
                GatewayName::PaypalCheckoutLink.as_str(),
                "PAYPAL_BUSINESS_EMAIL is not configured",
            ));
        }
        let is_production = settings.get_bool("PAYPAL_IS_PRODUCTION", false);
        let (checkout, ipn) = if is_production {
            (PRODUCTION_WEBSCR, PRODUCTION_IPN)
        } else {
            (SANDBOX_WEBSCR, SANDBOX_IPN)
        };

        Ok(Self {
            business_email,
            is_production,
            checkout_url: checkout.to_string(),
            ipn_verify_url: settings.get("PAYPAL_IPN_VERIFY_URL").unwrap_or(ipn).to_string(),
            idr_per_usd: settings
                .get_decimal("PAYPAL_IDR_PER_USD", Decimal::from(DEFAULT_IDR_PER_USD)),
            runtime: runtime.clone(),
        })
    }
}

/// IPN `payment_status`.
pub fn map_ipn_status(payment_status: &str) -> TransactionStatus {
    match payment_status.to_lowercase().as_str() {
        "completed" | "processed" => TransactionStatus::Success,
        "pending" | "in-progress" => TransactionStatus::Pending,
        "denied" | "failed" => TransactionStatus::Failed,
        "expired" => TransactionStatus::Expired,
        "refunded" | "reversed" => TransactionStatus::Refunded,
        "voided" | "canceled_reversal" => TransactionStatus::Cancelled,
        _ => TransactionStatus::Unknown,
    }
}

pub struct PaypalCheckoutLinkGateway {
    config: PaypalCheckoutLinkConfig,
    http: PaymentHttpClient,
}

impl PaypalCheckoutLinkGateway {
    pub fn new(config: PaypalCheckoutLinkConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(config.runtime.request_timeout)?;
        Ok(Self { config, http })
    }
}

#[async_trait]
impl PaymentGateway for PaypalCheckoutLinkGateway {
    fn name(&self) -> GatewayName {
        GatewayName::PaypalCheckoutLink
    }

    fn capabilities(&self) -> GatewayCapabilities {
        GatewayCapabilities {
            supports_cancellation: false,
            supports_webhooks: true,
            supports_status_check: false,
        }
    }

    async fn create_transaction(
        &self,
        request: &CreateTransactionRequest,
    ) -> CreateTransactionResult {
        let usd = format_usd(idr_to_usd(request.amount, self.config.idr_per_usd));
        let mut url = match Url::parse(&self.config.checkout_url) {
            Ok(url) => url,
            Err(e) => return CreateTransactionResult::failed(e.to_string()),
        };
        let item_name: String = request.description.chars().take(127).collect();
        url.query_pairs_mut()
            .append_pair("cmd", "_xclick")
            .append_pair("business", &self.config.business_email)
            .append_pair("item_name", &item_name)
            .append_pair("item_number", &request.order_id)
            .append_pair("invoice", &request.order_id)
            .append_pair("custom", &request.customer.user_id.to_string())
            .append_pair("amount", &usd)
            .append_pair("currency_code", "USD")
            .append_pair("no_shipping", "1")
            .append_pair("return", &request.callbacks.success)
            .append_pair("cancel_return", &request.callbacks.failure)
            .append_pair("notify_url", &request.callbacks.webhook);

        info!(order_id = %request.order_id, usd = %usd, "paypal checkout link built");
        CreateTransactionResult::created(
            url.to_string(),
            None,
            json!({
                "redirect_url": url.to_string(),
                "usd_amount": usd,
            }),
        )
    }

    async fn verify_transaction(&self, _request: &StatusRequest) -> VerifyTransactionResult {
        VerifyTransactionResult::invalid("paypal checkout links have no status API")
    }

    /// IPN post-back: the raw body is echoed to PayPal prefixed with
    /// `cmd=_notify-validate`, which answers `VERIFIED` or `INVALID`.
    async fn authenticate_notification(
        &self,
        request: &WebhookRequest,
    ) -> PaymentResult<WebhookVerificationResult> {
        let receiver = json_str(&request.payload, "receiver_email")
            .or_else(|| json_str(&request.payload, "business"));
        match receiver {
            Some(r) if r.eq_ignore_ascii_case(&self.config.business_email) => {}
            _ => return Ok(WebhookVerificationResult::rejected("receiver_email mismatch")),
        }

        let body = format!(
            "cmd=_notify-validate&{}",
            String::from_utf8_lossy(&request.raw_body)
        );
        let answer = self
            .http
            .request_text(
                GatewayName::PaypalCheckoutLink.as_str(),
                Method::POST,
                &self.config.ipn_verify_url,
                HttpAuth::None,
                HttpBody::Form(&body),
                &[("User-Agent", "premium-payments-ipn")],
            )
            .await?;

        match answer.trim() {
            "VERIFIED" => Ok(WebhookVerificationResult::accepted()),
            other => {
                warn!(answer = %other, "paypal IPN post-back did not verify");
                Ok(WebhookVerificationResult::rejected(format!(
                    "IPN post-back answered {}",
                    other
                )))
            }
        }
    }

    /// The post-back already confirmed the message, so the payload is used as is.
    async fn handle_notification(&self, payload: &JsonValue) -> PaymentResult<NotificationResult> {
        let order_id = json_str(payload, "invoice")
            .or_else(|| json_str(payload, "item_number"))
            .ok_or_else(|| PaymentError::ValidationError {
                message: "IPN message has no invoice".to_string(),
                field: Some("invoice".to_string()),
            })?;
        let payment_status = json_str(payload, "payment_status").unwrap_or_default();
        let status = map_ipn_status(&payment_status);

        Ok(NotificationResult {
            order_id,
            status,
            is_success: status == TransactionStatus::Success,
            amount: None,
            payment_method: Some("paypal".to_string()),
            details: json!({
                "ipn": redact_json(payload),
                "verified_by": "ipn_postback",
                "paypal_txn_id": json_str(payload, "txn_id"),
                "mc_gross": json_str(payload, "mc_gross"),
                "mc_currency": json_str(payload, "mc_currency"),
            }),
            event_type: json_str(payload, "txn_type"),
        })
    }

    /// The link amount is client-editable, so `mc_gross` must cover the
    /// USD amount the link was built with.
    fn settlement_mismatch(
        &self,
        notification: &NotificationResult,
        creation_details: &JsonValue,
    ) -> Option<String> {
        let Some(expected) =
            json_str(creation_details, "usd_amount").and_then(|v| v.parse::<Decimal>().ok())
        else {
            return Some("no USD amount was recorded for this payment".to_string());
        };

        let currency = json_str(&notification.details, "mc_currency");
        if !currency
            .as_deref()
            .is_some_and(|c| c.eq_ignore_ascii_case("USD"))
        {
            return Some(format!(
                "paid in {} instead of USD",
                currency.as_deref().unwrap_or("an unknown currency")
            ));
        }

        match json_str(&notification.details, "mc_gross").and_then(|v| v.parse::<Decimal>().ok()) {
            Some(paid) if paid >= expected => None,
            Some(paid) => Some(format!("paid {} USD, expected {} USD", paid, expected)),
            None => Some("IPN message has no mc_gross".to_string()),
        }
    }
}
