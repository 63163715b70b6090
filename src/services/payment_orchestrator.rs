//! Premium Payment Orchestrator
//!
//! Drives a premium purchase from eligibility checks to a pending ledger row,
//! and serves manual status polls through the reconciler.

use crate::clock::Clock;
use crate::config::PaymentRuntimeConfig;
use crate::database::models::{NewTransaction, Transaction, UserAccount};
use crate::database::repository::{TransactionRepository, UserRepository};
use crate::error::{AppError, AppErrorKind, DomainError};
use crate::payments::factory::GatewayFactory;
use crate::payments::gateway::PaymentGateway;
use crate::payments::types::{
    CallbackUrls, CreateTransactionRequest, CustomerInfo, GatewayName, StatusRequest,
    TransactionStatus,
};
use crate::services::fraud_detection::{FraudCheckDetails, FraudCheckResult, FraudDetector};
use crate::services::transaction_monitor::{ReconcileOutcome, TransactionMonitor};
use crate::services::transaction_validator::{TransactionValidator, ValidationReason};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct PremiumPaymentRequest {
    pub user_id: Uuid,
    /// Falls back to the configured active gateway.
    pub gateway: Option<GatewayName>,
    pub payment_method: String,
    /// Falls back to the configured premium price.
    pub amount: Option<i64>,
    pub ip_address: Option<String>,
    pub success_url: Option<String>,
    pub failure_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PaymentCreation {
    Created {
        transaction: Transaction,
        redirect_url: String,
        fraud: FraudCheckResult,
    },
    Rejected {
        reason: ValidationReason,
        existing_transaction: Option<Transaction>,
        expected_amount: i64,
    },
    GatewayFailed {
        gateway: GatewayName,
        error: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusCheck {
    pub transaction: Transaction,
    /// Status the provider reported, when it could be asked.
    pub observed: Option<TransactionStatus>,
    pub verification_error: Option<String>,
}

/// `PREM-<yyyyMMddHHmmss>-<8 hex>`.
pub fn generate_order_id(now: DateTime<Utc>) -> String {
    let suffix: u32 = rand::thread_rng().gen();
    format!("PREM-{}-{:08X}", now.format("%Y%m%d%H%M%S"), suffix)
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct PaymentOrchestrator {
    factory: Arc<GatewayFactory>,
    validator: Arc<TransactionValidator>,
    fraud: Arc<FraudDetector>,
    monitor: Arc<TransactionMonitor>,
    transactions: Arc<dyn TransactionRepository>,
    users: Arc<dyn UserRepository>,
    runtime: PaymentRuntimeConfig,
    clock: Arc<dyn Clock>,
}

impl PaymentOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        factory: Arc<GatewayFactory>,
        validator: Arc<TransactionValidator>,
        fraud: Arc<FraudDetector>,
        monitor: Arc<TransactionMonitor>,
        transactions: Arc<dyn TransactionRepository>,
        users: Arc<dyn UserRepository>,
        runtime: PaymentRuntimeConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            factory,
            validator,
            fraud,
            monitor,
            transactions,
            users,
            runtime,
            clock,
        }
    }

    pub fn factory(&self) -> &Arc<GatewayFactory> {
        &self.factory
    }

    pub async fn create_premium_payment(
        &self,
        request: PremiumPaymentRequest,
    ) -> Result<PaymentCreation, AppError> {
        let amount = match request.amount {
            Some(amount) => amount,
            None => self.factory.settings().premium_price().await,
        };

        let outcome = self.validator.validate(request.user_id, amount).await?;
        if let Some(reason) = outcome.reason {
            info!(
                user_id = %request.user_id,
                reason = reason.as_str(),
                "Premium payment rejected by validation"
            );
            return Ok(PaymentCreation::Rejected {
                reason,
                existing_transaction: outcome.existing_transaction,
                expected_amount: outcome.expected_amount,
            });
        }

        let gateway = self.factory.get_gateway(request.gateway).await?;

        let user = self
            .users
            .find_by_id(request.user_id)
            .await?
            .ok_or_else(|| {
                AppError::new(AppErrorKind::Domain(DomainError::UserNotFound {
                    user_id: request.user_id.to_string(),
                }))
            })?;

        let order_id = generate_order_id(self.clock.now());
        let span = crate::logging::payment_span(&Uuid::new_v4().to_string(), Some(&order_id));
        self.create_for_order(request, amount, gateway, user, order_id)
            .instrument(span)
            .await
    }

    async fn create_for_order(
        &self,
        request: PremiumPaymentRequest,
        amount: i64,
        gateway: Arc<dyn PaymentGateway>,
        user: UserAccount,
        order_id: String,
    ) -> Result<PaymentCreation, AppError> {
        let gateway_name = gateway.name();
        let fraud = self
            .fraud
            .check(
                user.id,
                &order_id,
                &FraudCheckDetails {
                    amount,
                    ip_address: request.ip_address.clone(),
                    pre_commit: true,
                },
            )
            .await;

        let base = &self.runtime.public_base_url;
        let create = CreateTransactionRequest {
            customer: CustomerInfo {
                user_id: user.id,
                email: user.email.clone(),
                name: user.name.clone(),
                phone: user.phone.clone(),
            },
            amount,
            order_id: order_id.clone(),
            description: "Lifetime premium membership".to_string(),
            callbacks: CallbackUrls {
                success: request
                    .success_url
                    .unwrap_or_else(|| format!("{}/payment/success?order_id={}", base, order_id)),
                failure: request
                    .failure_url
                    .unwrap_or_else(|| format!("{}/payment/failed?order_id={}", base, order_id)),
                webhook: self.runtime.webhook_url(gateway_name.as_str()),
            },
            payment_method: request.payment_method.clone(),
        };

        let created = gateway.create_transaction(&create).await;
        if !created.success {
            let error = created
                .error
                .unwrap_or_else(|| "gateway did not create the transaction".to_string());
            warn!(gateway = %gateway_name, error = %error, "Gateway failed to create transaction");
            return Ok(PaymentCreation::GatewayFailed {
                gateway: gateway_name,
                error,
            });
        }

        let mut details = match created.details {
            JsonValue::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        if let Some(url) = &created.redirect_url {
            details.insert("redirect_url".to_string(), json!(url));
        }
        if let Some(reference) = &created.gateway_reference {
            details.insert("gateway_reference".to_string(), json!(reference));
        }
        details.insert(
            "fraud_check".to_string(),
            json!({
                "risk_level": fraud.risk_level.as_str(),
                "reasons": fraud.reason_names(),
            }),
        );
        let redirect_url = created.redirect_url.unwrap_or_default();

        let transaction = self
            .transactions
            .insert(NewTransaction {
                order_id: order_id.clone(),
                user_id: user.id,
                amount,
                payment_method: request.payment_method,
                gateway: gateway_name,
                details: JsonValue::Object(details),
            })
            .await
            .map_err(|e| {
                error!(
                    order_id = %order_id,
                    gateway = %gateway_name,
                    error = %e,
                    "Remote transaction created but ledger insert failed"
                );
                AppError::from(e)
            })?;

        info!(
            transaction_id = %transaction.id,
            order_id = %order_id,
            gateway = %gateway_name,
            amount,
            "Premium payment created"
        );

        Ok(PaymentCreation::Created {
            transaction,
            redirect_url,
            fraud,
        })
    }

    /// Manual poll: asks the gateway and reconciles what it reports.
    pub async fn check_status(&self, transaction_id: Uuid) -> Result<StatusCheck, AppError> {
        let transaction = self.load(transaction_id).await?;
        if transaction.status.is_terminal() {
            return Ok(StatusCheck {
                transaction,
                observed: None,
                verification_error: None,
            });
        }

        let gateway = self.factory.gateway(transaction.gateway)?;
        if !gateway.capabilities().supports_status_check {
            let message = format!("{} does not support status checks", transaction.gateway);
            return Ok(StatusCheck {
                transaction,
                observed: None,
                verification_error: Some(message),
            });
        }

        let span = crate::logging::payment_span(
            &Uuid::new_v4().to_string(),
            Some(&transaction.order_id),
        );
        self.verify_and_reconcile(transaction, gateway)
            .instrument(span)
            .await
    }

    async fn verify_and_reconcile(
        &self,
        transaction: Transaction,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Result<StatusCheck, AppError> {
        let transaction_id = transaction.id;
        let status_request = StatusRequest {
            order_id: transaction.order_id.clone(),
            gateway_reference: gateway
                .gateway_reference(&transaction.details)
                .map(str::to_string),
        };
        let verified = gateway.verify_transaction(&status_request).await;
        if !verified.is_valid {
            warn!(
                transaction_id = %transaction.id,
                gateway = %transaction.gateway,
                error = ?verified.error,
                "Status check could not verify transaction"
            );
            return Ok(StatusCheck {
                transaction,
                observed: None,
                verification_error: verified.error,
            });
        }

        let observed = verified.status;
        let outcome = self
            .monitor
            .reconcile(transaction.id, observed, &verified.details)
            .await?;
        let transaction = match outcome {
            ReconcileOutcome::Applied { transaction, .. }
            | ReconcileOutcome::Unchanged { transaction } => transaction,
            ReconcileOutcome::Ignored | ReconcileOutcome::Conflict { .. } => {
                self.load(transaction_id).await?
            }
        };

        Ok(StatusCheck {
            transaction,
            observed: Some(observed),
            verification_error: None,
        })
    }

    pub async fn get_transaction(&self, transaction_id: Uuid) -> Result<Transaction, AppError> {
        self.load(transaction_id).await
    }

    async fn load(&self, transaction_id: Uuid) -> Result<Transaction, AppError> {
        self.transactions
            .find_by_id(transaction_id)
            .await?
            .ok_or_else(|| {
                AppError::new(AppErrorKind::Domain(DomainError::TransactionNotFound {
                    transaction_id: transaction_id.to_string(),
                }))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn order_ids_are_timestamped_and_unique() {
        let now = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        let a = generate_order_id(now);
        let b = generate_order_id(now);

        assert!(a.starts_with("PREM-20260304050607-"));
        assert_eq!(a.len(), "PREM-20260304050607-".len() + 8);
        assert!(a[20..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
        assert_ne!(a, b);
    }
}
