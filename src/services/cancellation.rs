//! User-initiated cancellation of pending premium payments.

use crate::database::models::Transaction;
use crate::database::repository::TransactionRepository;
use crate::error::{AppError, AppErrorKind, DomainError, ExternalError};
use crate::payments::factory::GatewayFactory;
use crate::payments::types::{GatewayName, TransactionStatus};
use crate::services::transaction_monitor::{ReconcileOutcome, TransactionMonitor};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Gateways whose pending payments are never cancelled remotely. Their
/// payment codes expire on the provider side on their own.
pub const GATEWAYS_LEFT_TO_EXPIRE: [GatewayName; 1] = [GatewayName::Duitku];

#[derive(Debug, Clone, Serialize)]
pub struct CancellationOutcome {
    pub transaction: Transaction,
    /// True only when the provider acknowledged the cancel call.
    pub remote_cancelled: bool,
    pub message: String,
}

pub struct CancellationService {
    factory: Arc<GatewayFactory>,
    transactions: Arc<dyn TransactionRepository>,
    monitor: Arc<TransactionMonitor>,
}

impl CancellationService {
    pub fn new(
        factory: Arc<GatewayFactory>,
        transactions: Arc<dyn TransactionRepository>,
        monitor: Arc<TransactionMonitor>,
    ) -> Self {
        Self {
            factory,
            transactions,
            monitor,
        }
    }

    pub async fn cancel(
        &self,
        transaction_id: Uuid,
        requested_by: Option<Uuid>,
    ) -> Result<CancellationOutcome, AppError> {
        let transaction = self
            .transactions
            .find_by_id(transaction_id)
            .await?
            .filter(|t| requested_by.map_or(true, |user| t.user_id == user))
            .ok_or_else(|| {
                AppError::new(AppErrorKind::Domain(DomainError::TransactionNotFound {
                    transaction_id: transaction_id.to_string(),
                }))
            })?;

        if transaction.status != TransactionStatus::Pending {
            return Err(not_cancellable(&transaction));
        }

        let (remote_cancelled, message) = if GATEWAYS_LEFT_TO_EXPIRE.contains(&transaction.gateway)
        {
            info!(
                transaction_id = %transaction.id,
                gateway = %transaction.gateway,
                "Skipping remote cancel, provider expires the payment itself"
            );
            (
                false,
                format!(
                    "{} payments expire on the provider side; the transaction is cancelled in the local ledger only",
                    transaction.gateway
                ),
            )
        } else {
            let gateway = self.factory.gateway(transaction.gateway)?;
            let reference = gateway
                .cancel_reference(&transaction.order_id, &transaction.details)
                .to_string();
            let result = gateway.cancel_transaction(&reference).await;
            if !result.success {
                let message = result
                    .error
                    .unwrap_or_else(|| "cancellation refused by provider".to_string());
                warn!(
                    transaction_id = %transaction.id,
                    gateway = %transaction.gateway,
                    error = %message,
                    "Remote cancellation failed"
                );
                return Err(AppError::new(AppErrorKind::External(
                    ExternalError::PaymentProvider {
                        provider: transaction.gateway.to_string(),
                        message,
                        is_retryable: false,
                    },
                )));
            }
            (
                result.remote_cancelled,
                result
                    .message
                    .unwrap_or_else(|| "transaction cancelled".to_string()),
            )
        };

        let patch = json!({
            "remote_cancelled": remote_cancelled,
            "cancellation_message": message,
            "cancelled_by": requested_by,
        });
        match self
            .monitor
            .reconcile(transaction.id, TransactionStatus::Cancelled, &patch)
            .await?
        {
            ReconcileOutcome::Applied { transaction, .. }
            | ReconcileOutcome::Unchanged { transaction } => Ok(CancellationOutcome {
                transaction,
                remote_cancelled,
                message,
            }),
            ReconcileOutcome::Conflict { current, .. } => {
                let mut current_tx = transaction;
                current_tx.status = current;
                Err(not_cancellable(&current_tx))
            }
            ReconcileOutcome::Ignored => Err(not_cancellable(&transaction)),
        }
    }
}

fn not_cancellable(transaction: &Transaction) -> AppError {
    AppError::new(AppErrorKind::Domain(DomainError::TransactionNotCancellable {
        transaction_id: transaction.id.to_string(),
        status: transaction.status.to_string(),
    }))
}
