use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn, Instrument};

use crate::database::repository::TransactionRepository;
use crate::payments::error::PaymentError;
use crate::payments::factory::GatewayFactory;
use crate::payments::types::{GatewayName, TransactionStatus, WebhookRequest};
use crate::services::fraud_detection::{FraudCheckDetails, FraudDetector};
use crate::services::notification::{AdminAlert, AdminAlertEmitter};
use crate::services::transaction_monitor::{MonitorError, ReconcileOutcome, TransactionMonitor};

#[derive(Debug, Error)]
pub enum WebhookProcessorError {
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
    #[error("Malformed notification: {0}")]
    Malformed(String),
    #[error("Unknown gateway: {0}")]
    UnknownGateway(String),
    #[error("Gateway unavailable: {0}")]
    GatewayUnavailable(String),
    /// The provider should deliver the notification again later.
    #[error("Temporarily unable to process: {0}")]
    Retryable(String),
    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl WebhookProcessorError {
    pub fn status_code(&self) -> u16 {
        match self {
            WebhookProcessorError::InvalidSignature(_) => 401,
            WebhookProcessorError::Malformed(_) => 400,
            WebhookProcessorError::UnknownGateway(_) => 404,
            WebhookProcessorError::GatewayUnavailable(_) => 503,
            WebhookProcessorError::Retryable(_) => 503,
            WebhookProcessorError::DatabaseError(_) => 500,
        }
    }

    fn from_payment(err: PaymentError) -> Self {
        match err {
            PaymentError::WebhookVerificationError { message } => {
                WebhookProcessorError::InvalidSignature(message)
            }
            e @ PaymentError::ConfigurationError { .. } => {
                WebhookProcessorError::GatewayUnavailable(e.to_string())
            }
            e if e.is_retryable() => WebhookProcessorError::Retryable(e.to_string()),
            e => WebhookProcessorError::Malformed(e.to_string()),
        }
    }
}

impl From<MonitorError> for WebhookProcessorError {
    fn from(err: MonitorError) -> Self {
        match err {
            e @ MonitorError::ConcurrentUpdate(_) => WebhookProcessorError::Retryable(e.to_string()),
            other => WebhookProcessorError::DatabaseError(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WebhookAction {
    Applied,
    Duplicate,
    Ignored,
    Conflict,
    UnknownOrder,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookOutcome {
    pub gateway: GatewayName,
    pub order_id: String,
    pub status: TransactionStatus,
    pub action: WebhookAction,
}

pub struct WebhookProcessor {
    factory: Arc<GatewayFactory>,
    transactions: Arc<dyn TransactionRepository>,
    fraud: Arc<FraudDetector>,
    monitor: Arc<TransactionMonitor>,
    alerts: AdminAlertEmitter,
}

impl WebhookProcessor {
    pub fn new(
        factory: Arc<GatewayFactory>,
        transactions: Arc<dyn TransactionRepository>,
        fraud: Arc<FraudDetector>,
        monitor: Arc<TransactionMonitor>,
        alerts: AdminAlertEmitter,
    ) -> Self {
        Self {
            factory,
            transactions,
            fraud,
            monitor,
            alerts,
        }
    }

    pub async fn process_webhook(
        &self,
        gateway_name: &str,
        request: &WebhookRequest,
        request_id: &str,
    ) -> Result<WebhookOutcome, WebhookProcessorError> {
        let name = GatewayName::from_str(gateway_name)
            .map_err(|_| WebhookProcessorError::UnknownGateway(gateway_name.to_string()))?;
        let span = crate::logging::payment_span(request_id, None);
        self.process(name, request).instrument(span).await
    }

    async fn process(
        &self,
        name: GatewayName,
        request: &WebhookRequest,
    ) -> Result<WebhookOutcome, WebhookProcessorError> {
        let gateway = self
            .factory
            .gateway(name)
            .map_err(WebhookProcessorError::from_payment)?;

        let verification = gateway
            .authenticate_notification(request)
            .await
            .map_err(WebhookProcessorError::from_payment)?;
        if !verification.valid {
            let reason = verification
                .reason
                .unwrap_or_else(|| "signature mismatch".to_string());
            error!(gateway = %name, reason = %reason, "Rejected webhook with invalid signature");
            return Err(WebhookProcessorError::InvalidSignature(reason));
        }

        let notification = gateway
            .handle_notification(&request.payload)
            .await
            .map_err(WebhookProcessorError::from_payment)?;
        tracing::Span::current().record("order_id", notification.order_id.as_str());

        info!(
            gateway = %name,
            order_id = %notification.order_id,
            status = notification.status.as_str(),
            event_type = ?notification.event_type,
            "Webhook notification received"
        );

        let transaction = match self
            .transactions
            .find_by_order_id(&notification.order_id)
            .await
            .map_err(|e| WebhookProcessorError::DatabaseError(e.to_string()))?
        {
            Some(transaction) => transaction,
            None => {
                warn!(
                    gateway = %name,
                    order_id = %notification.order_id,
                    "Webhook for unknown order, acknowledging"
                );
                return Ok(WebhookOutcome {
                    gateway: name,
                    order_id: notification.order_id,
                    status: notification.status,
                    action: WebhookAction::UnknownOrder,
                });
            }
        };

        if transaction.gateway != name {
            warn!(
                order_id = %transaction.order_id,
                expected = %transaction.gateway,
                received = %name,
                "Webhook arrived through a different gateway than the order was created with"
            );
        }

        let mut status = notification.status;
        let mismatch = if status == TransactionStatus::Success
            && transaction.status == TransactionStatus::Pending
        {
            gateway.settlement_mismatch(&notification, &transaction.details)
        } else {
            None
        };

        let mut details = match notification.details {
            JsonValue::Object(map) => map,
            JsonValue::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("notification".to_string(), other);
                map
            }
        };
        if let Some(event_type) = &notification.event_type {
            details.insert("event_type".to_string(), json!(event_type));
        }

        if let Some(reason) = mismatch {
            error!(
                order_id = %transaction.order_id,
                gateway = %name,
                reason = %reason,
                "Settlement does not cover the payment, refusing it"
            );
            self.alerts.emit(AdminAlert::critical(
                "settlement_amount_mismatch",
                format!(
                    "Settlement for order {} refused: {}",
                    transaction.order_id, reason
                ),
                json!({
                    "transaction_id": transaction.id,
                    "order_id": transaction.order_id,
                    "user_id": transaction.user_id,
                    "gateway": name.as_str(),
                    "reason": reason,
                }),
            ));
            details.insert("settlement_mismatch".to_string(), json!(reason));
            status = TransactionStatus::Failed;
        }

        if status == TransactionStatus::Success
            && transaction.status == TransactionStatus::Pending
        {
            if let Some(amount) = notification.amount {
                if amount != transaction.amount {
                    warn!(
                        order_id = %transaction.order_id,
                        expected = transaction.amount,
                        reported = amount,
                        "Paid amount differs from ledger amount"
                    );
                }
            }
            let fraud = self
                .fraud
                .check(
                    transaction.user_id,
                    &transaction.order_id,
                    &FraudCheckDetails {
                        amount: notification.amount.unwrap_or(transaction.amount),
                        ip_address: None,
                        pre_commit: false,
                    },
                )
                .await;
            details.insert(
                "settlement_fraud_check".to_string(),
                json!({
                    "risk_level": fraud.risk_level.as_str(),
                    "reasons": fraud.reason_names(),
                }),
            );
        }

        let outcome = self
            .monitor
            .reconcile(transaction.id, status, &JsonValue::Object(details))
            .await
            .map_err(|e| {
                error!(
                    transaction_id = %transaction.id,
                    order_id = %transaction.order_id,
                    error = %e,
                    "Failed to apply webhook observation"
                );
                WebhookProcessorError::from(e)
            })?;

        let action = match outcome {
            ReconcileOutcome::Applied { .. } => WebhookAction::Applied,
            ReconcileOutcome::Unchanged { .. } => WebhookAction::Duplicate,
            ReconcileOutcome::Ignored => WebhookAction::Ignored,
            ReconcileOutcome::Conflict { .. } => WebhookAction::Conflict,
        };

        Ok(WebhookOutcome {
            gateway: name,
            order_id: notification.order_id,
            status,
            action,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_http_statuses() {
        assert_eq!(
            WebhookProcessorError::InvalidSignature("bad".into()).status_code(),
            401
        );
        assert_eq!(WebhookProcessorError::Malformed("x".into()).status_code(), 400);
        assert_eq!(WebhookProcessorError::Retryable("x".into()).status_code(), 503);
        assert_eq!(WebhookProcessorError::DatabaseError("x".into()).status_code(), 500);
    }

    #[test]
    fn payment_errors_keep_their_retry_class() {
        let transient = WebhookProcessorError::from_payment(PaymentError::NetworkError {
            message: "reset".into(),
        });
        assert!(matches!(transient, WebhookProcessorError::Retryable(_)));

        let invalid = WebhookProcessorError::from_payment(PaymentError::ValidationError {
            message: "missing order_id".into(),
            field: None,
        });
        assert!(matches!(invalid, WebhookProcessorError::Malformed(_)));
    }
}
