use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::types::{
    CancelTransactionResult, CreateTransactionRequest, CreateTransactionResult, GatewayCapabilities,
    GatewayName, NotificationResult, StatusRequest, TransactionStatus, VerifyTransactionResult,
    WebhookRequest, WebhookVerificationResult,
};
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tracing::warn;

/// Contract every payment gateway implements.
///
/// Creation, verification and cancellation report failure through their
/// result structs. `Err` is reserved for the notification path, where the
/// HTTP layer needs to distinguish a bad request from a transient failure.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> GatewayName;

    fn capabilities(&self) -> GatewayCapabilities;

    /// Talks to the provider only; persisting the pending row is the caller's job.
    async fn create_transaction(&self, request: &CreateTransactionRequest)
        -> CreateTransactionResult;

    /// Pulls the provider's current status, mapped to [`TransactionStatus`].
    async fn verify_transaction(&self, request: &StatusRequest) -> VerifyTransactionResult;

    /// Checks that an inbound notification really comes from the provider.
    async fn authenticate_notification(
        &self,
        request: &WebhookRequest,
    ) -> PaymentResult<WebhookVerificationResult>;

    /// Extracts the order and status from an authenticated notification,
    /// re-checking with the provider where it offers a status API.
    async fn handle_notification(&self, payload: &JsonValue) -> PaymentResult<NotificationResult>;

    async fn cancel_transaction(&self, _reference: &str) -> CancelTransactionResult {
        CancelTransactionResult::local_only(self.name())
    }

    /// Redirect URL from the details returned at creation.
    fn redirect_url<'a>(&self, details: &'a JsonValue) -> Option<&'a str> {
        details.get("redirect_url").and_then(|v| v.as_str())
    }

    /// Provider-side reference from the details returned at creation.
    fn gateway_reference<'a>(&self, details: &'a JsonValue) -> Option<&'a str> {
        details.get("gateway_reference").and_then(|v| v.as_str())
    }

    /// Checks a settlement notification against what the payment asked for,
    /// using the details stored at creation. `Some(reason)` refuses the
    /// settlement.
    fn settlement_mismatch(
        &self,
        _notification: &NotificationResult,
        _creation_details: &JsonValue,
    ) -> Option<String> {
        None
    }

    /// Identifier handed to [`PaymentGateway::cancel_transaction`].
    fn cancel_reference<'a>(&self, order_id: &'a str, details: &'a JsonValue) -> &'a str {
        self.gateway_reference(details).unwrap_or(order_id)
    }
}

/// Folds a status re-check into what the notification itself claimed.
///
/// A confirmed re-check wins. When the re-check is unavailable the payload's
/// own view is used if `trust_payload` is set; otherwise the notification is
/// refused with a retryable error so the provider delivers it again.
pub(crate) fn trust_but_verify(
    gateway: GatewayName,
    claimed: NotificationResult,
    verified: VerifyTransactionResult,
    trust_payload: bool,
) -> PaymentResult<NotificationResult> {
    if verified.is_valid && verified.status != TransactionStatus::Unknown {
        if verified.status != claimed.status {
            warn!(
                gateway = %gateway,
                order_id = %claimed.order_id,
                claimed = %claimed.status,
                verified = %verified.status,
                "Notification status differs from provider status, using provider status"
            );
        }
        return Ok(NotificationResult {
            is_success: verified.status == TransactionStatus::Success,
            status: verified.status,
            amount: verified.amount.or(claimed.amount),
            payment_method: verified.payment_method.or(claimed.payment_method),
            details: json!({
                "notification": claimed.details,
                "verification": verified.details,
                "verified_by": "status_check",
            }),
            order_id: claimed.order_id,
            event_type: claimed.event_type,
        });
    }

    let reason = verified
        .error
        .unwrap_or_else(|| "provider returned an unmappable status".to_string());

    if !trust_payload {
        return Err(PaymentError::ProviderError {
            provider: gateway.to_string(),
            message: format!("status re-check unavailable: {}", reason),
            provider_code: None,
            retryable: true,
        });
    }

    warn!(
        gateway = %gateway,
        order_id = %claimed.order_id,
        reason = %reason,
        "Status re-check unavailable, trusting notification payload"
    );
    Ok(NotificationResult {
        details: json!({
            "notification": claimed.details,
            "verified_by": "payload",
            "verification_error": reason,
        }),
        ..claimed
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claimed(status: TransactionStatus) -> NotificationResult {
        NotificationResult {
            order_id: "PREM-1".to_string(),
            status,
            is_success: status == TransactionStatus::Success,
            amount: Some(99_000),
            payment_method: Some("QRIS".to_string()),
            details: json!({"raw": true}),
            event_type: None,
        }
    }

    #[test]
    fn confirmed_status_overrides_payload() {
        let verified = VerifyTransactionResult::verified(TransactionStatus::Pending, json!({}));
        let result = trust_but_verify(
            GatewayName::Midtrans,
            claimed(TransactionStatus::Success),
            verified,
            true,
        )
        .unwrap();
        assert_eq!(result.status, TransactionStatus::Pending);
        assert!(!result.is_success);
        assert_eq!(result.amount, Some(99_000));
    }

    #[test]
    fn unavailable_check_trusts_payload_when_enabled() {
        let result = trust_but_verify(
            GatewayName::Duitku,
            claimed(TransactionStatus::Success),
            VerifyTransactionResult::invalid("HTTP 503"),
            true,
        )
        .unwrap();
        assert_eq!(result.status, TransactionStatus::Success);
        assert_eq!(result.details["verified_by"], "payload");
        assert_eq!(result.details["verification_error"], "HTTP 503");
    }

    #[test]
    fn unavailable_check_is_retryable_when_trust_disabled() {
        let err = trust_but_verify(
            GatewayName::Duitku,
            claimed(TransactionStatus::Success),
            VerifyTransactionResult::invalid("HTTP 503"),
            false,
        )
        .unwrap_err();
        assert!(err.is_retryable());
    }
}
