//! The single write path for transaction status.
//!
//! Every status change goes through [`TransactionMonitor::reconcile`], which
//! is idempotent on replay, keeps terminal states immutable and grants
//! premium at most once per transaction.

use crate::clock::Clock;
use crate::database::error::DatabaseError;
use crate::database::models::Transaction;
use crate::database::repository::{TransactionRepository, UserRepository};
use crate::error::{AppError, AppErrorKind, DomainError, InfrastructureError};
use crate::payments::types::TransactionStatus;
use crate::services::notification::{AdminAlert, AdminAlertEmitter};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Compare-and-set attempts before giving up on a contended row.
const MAX_CAS_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("transaction not found: {0}")]
    TransactionNotFound(Uuid),

    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("premium upgrade failed for user {user_id}: {message}")]
    PremiumUpgradeFailed { user_id: Uuid, message: String },

    #[error("transaction {0} kept changing under reconciliation")]
    ConcurrentUpdate(Uuid),
}

impl From<MonitorError> for AppError {
    fn from(err: MonitorError) -> Self {
        match err {
            MonitorError::TransactionNotFound(id) => {
                AppError::new(AppErrorKind::Domain(DomainError::TransactionNotFound {
                    transaction_id: id.to_string(),
                }))
            }
            MonitorError::Database(e) => e.into(),
            other => AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
                message: other.to_string(),
                is_retryable: true,
            })),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    /// Status written. `premium_granted` is true when this call upgraded the user.
    Applied {
        transaction: Transaction,
        premium_granted: bool,
    },
    /// Stored status already equals the observation.
    Unchanged { transaction: Transaction },
    /// `unknown` observations are never written.
    Ignored,
    /// A terminal row was observed in a different status; nothing written.
    Conflict {
        current: TransactionStatus,
        observed: TransactionStatus,
    },
}

impl ReconcileOutcome {
    pub fn transaction(&self) -> Option<&Transaction> {
        match self {
            ReconcileOutcome::Applied { transaction, .. }
            | ReconcileOutcome::Unchanged { transaction } => Some(transaction),
            _ => None,
        }
    }
}

pub struct TransactionMonitor {
    transactions: Arc<dyn TransactionRepository>,
    users: Arc<dyn UserRepository>,
    alerts: AdminAlertEmitter,
    clock: Arc<dyn Clock>,
}

impl TransactionMonitor {
    pub fn new(
        transactions: Arc<dyn TransactionRepository>,
        users: Arc<dyn UserRepository>,
        alerts: AdminAlertEmitter,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transactions,
            users,
            alerts,
            clock,
        }
    }

    pub async fn reconcile(
        &self,
        transaction_id: Uuid,
        observed: TransactionStatus,
        details: &JsonValue,
    ) -> Result<ReconcileOutcome, MonitorError> {
        if observed == TransactionStatus::Unknown {
            debug!(transaction_id = %transaction_id, "Ignoring unknown status observation");
            return Ok(ReconcileOutcome::Ignored);
        }

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let current = self
                .transactions
                .find_by_id(transaction_id)
                .await
                .map_err(|e| {
                    error!(transaction_id = %transaction_id, error = %e, "Failed to load transaction");
                    e
                })?
                .ok_or(MonitorError::TransactionNotFound(transaction_id))?;

            if current.status == observed {
                return self.replay(current).await;
            }

            if current.status.is_terminal() {
                return Ok(self.conflict(&current, observed, details));
            }

            let patch = self.status_patch(details, observed);
            match self
                .transactions
                .update_status(transaction_id, current.status, observed, &patch)
                .await?
            {
                Some(updated) => {
                    info!(
                        transaction_id = %transaction_id,
                        order_id = %updated.order_id,
                        gateway = %updated.gateway,
                        from = current.status.as_str(),
                        to = observed.as_str(),
                        "Transaction status reconciled"
                    );
                    if observed != TransactionStatus::Success {
                        return Ok(ReconcileOutcome::Applied {
                            transaction: updated,
                            premium_granted: false,
                        });
                    }
                    let transaction = self.grant_premium(updated).await?;
                    return Ok(ReconcileOutcome::Applied {
                        transaction,
                        premium_granted: true,
                    });
                }
                None => {
                    debug!(
                        transaction_id = %transaction_id,
                        attempt,
                        "Status changed concurrently, re-reading"
                    );
                }
            }
        }

        warn!(transaction_id = %transaction_id, "Gave up reconciling contended transaction");
        Err(MonitorError::ConcurrentUpdate(transaction_id))
    }

    async fn replay(&self, current: Transaction) -> Result<ReconcileOutcome, MonitorError> {
        debug!(
            transaction_id = %current.id,
            status = current.status.as_str(),
            "Duplicate status observation"
        );
        // Only a previously failed upgrade is retried; an in-flight one has no marker yet.
        let upgrade_failed = current.details.get("premium_grant_failed_at").is_some();
        if current.status == TransactionStatus::Success
            && !current.premium_granted()
            && upgrade_failed
        {
            info!(transaction_id = %current.id, "Retrying previously failed premium upgrade");
            let transaction = self.grant_premium(current).await?;
            return Ok(ReconcileOutcome::Applied {
                transaction,
                premium_granted: true,
            });
        }
        Ok(ReconcileOutcome::Unchanged {
            transaction: current,
        })
    }

    fn conflict(
        &self,
        current: &Transaction,
        observed: TransactionStatus,
        details: &JsonValue,
    ) -> ReconcileOutcome {
        error!(
            transaction_id = %current.id,
            order_id = %current.order_id,
            gateway = %current.gateway,
            current = current.status.as_str(),
            observed = observed.as_str(),
            "Conflicting terminal status observed, keeping stored status"
        );
        self.alerts.emit(AdminAlert::warning(
            "reconciliation_conflict",
            format!(
                "Transaction {} is {} but {} was observed",
                current.order_id, current.status, observed
            ),
            json!({
                "transaction_id": current.id,
                "order_id": current.order_id,
                "gateway": current.gateway.as_str(),
                "current": current.status.as_str(),
                "observed": observed.as_str(),
                "observation": crate::logging::redact_json(details),
            }),
        ));
        ReconcileOutcome::Conflict {
            current: current.status,
            observed,
        }
    }

    fn status_patch(&self, details: &JsonValue, observed: TransactionStatus) -> JsonValue {
        let mut patch = match details {
            JsonValue::Object(map) => map.clone(),
            JsonValue::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("observation".to_string(), other.clone());
                map
            }
        };
        let stamp = format!("{}_at", observed.as_str());
        patch.insert(stamp, json!(self.clock.now()));
        JsonValue::Object(patch)
    }

    async fn grant_premium(&self, transaction: Transaction) -> Result<Transaction, MonitorError> {
        let failure = match self.users.grant_lifetime_premium(transaction.user_id).await {
            Ok(true) => None,
            Ok(false) => Some("user no longer exists".to_string()),
            Err(e) => Some(e.to_string()),
        };

        if let Some(message) = failure {
            error!(
                transaction_id = %transaction.id,
                user_id = %transaction.user_id,
                error = %message,
                "Premium upgrade failed after successful payment"
            );
            self.alerts.emit(AdminAlert::critical(
                "premium_upgrade_failed",
                format!("Paid order {} did not upgrade its user", transaction.order_id),
                json!({
                    "transaction_id": transaction.id,
                    "order_id": transaction.order_id,
                    "user_id": transaction.user_id,
                    "error": message,
                }),
            ));
            let marker = json!({ "premium_grant_failed_at": self.clock.now() });
            if let Err(e) = self
                .transactions
                .update_status(
                    transaction.id,
                    TransactionStatus::Success,
                    TransactionStatus::Success,
                    &marker,
                )
                .await
            {
                warn!(transaction_id = %transaction.id, error = %e, "Failed to mark upgrade failure");
            }
            return Err(MonitorError::PremiumUpgradeFailed {
                user_id: transaction.user_id,
                message,
            });
        }

        info!(
            transaction_id = %transaction.id,
            user_id = %transaction.user_id,
            "Lifetime premium granted"
        );

        let marker = json!({ "premium_granted_at": self.clock.now() });
        match self
            .transactions
            .update_status(
                transaction.id,
                TransactionStatus::Success,
                TransactionStatus::Success,
                &marker,
            )
            .await
        {
            Ok(Some(updated)) => Ok(updated),
            Ok(None) => Ok(transaction),
            Err(e) => {
                // The user is already upgraded; only the ledger marker is missing.
                warn!(transaction_id = %transaction.id, error = %e, "Failed to record premium grant");
                Ok(transaction)
            }
        }
    }
}
