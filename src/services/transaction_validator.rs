//! Pre-flight eligibility checks run before any gateway call.

use crate::clock::Clock;
use crate::database::error::DatabaseError;
use crate::database::models::Transaction;
use crate::database::repository::{TransactionRepository, UserRepository};
use crate::error::{AppError, AppErrorKind, DomainError};
use crate::payments::settings::PaymentSettings;
use crate::payments::types::TransactionStatus;
use chrono::Duration;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// A pending transaction younger than this blocks a new one.
pub const PENDING_WINDOW_MINUTES: i64 = 30;
/// A success within this window blocks a new one.
pub const RECENT_SUCCESS_WINDOW_HOURS: i64 = 24;
/// How many of the user's latest transactions are inspected.
const HISTORY_LIMIT: i64 = 50;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValidationReason {
    UserNotFound,
    AlreadyPremium,
    PendingTransaction,
    RecentSuccess,
    InvalidAmount,
}

impl ValidationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationReason::UserNotFound => "user_not_found",
            ValidationReason::AlreadyPremium => "already_premium",
            ValidationReason::PendingTransaction => "pending_transaction",
            ValidationReason::RecentSuccess => "recent_success",
            ValidationReason::InvalidAmount => "invalid_amount",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub reason: Option<ValidationReason>,
    /// The blocking transaction, so the caller can offer to resume it.
    pub existing_transaction: Option<Transaction>,
    pub expected_amount: i64,
}

impl ValidationOutcome {
    fn ok(expected_amount: i64) -> Self {
        Self {
            valid: true,
            reason: None,
            existing_transaction: None,
            expected_amount,
        }
    }

    fn rejected(
        reason: ValidationReason,
        existing_transaction: Option<Transaction>,
        expected_amount: i64,
    ) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
            existing_transaction,
            expected_amount,
        }
    }
}

/// Domain error for a validation rejection.
pub fn rejection_error(
    reason: ValidationReason,
    user_id: Uuid,
    amount: i64,
    expected: i64,
    existing: Option<&Transaction>,
) -> AppError {
    let domain = match reason {
        ValidationReason::UserNotFound => DomainError::UserNotFound {
            user_id: user_id.to_string(),
        },
        ValidationReason::AlreadyPremium => DomainError::AlreadyPremium {
            user_id: user_id.to_string(),
        },
        ValidationReason::PendingTransaction => DomainError::PendingTransaction {
            transaction_id: existing.map(|t| t.id.to_string()).unwrap_or_default(),
            order_id: existing.map(|t| t.order_id.clone()).unwrap_or_default(),
        },
        ValidationReason::RecentSuccess => DomainError::RecentSuccess {
            transaction_id: existing.map(|t| t.id.to_string()).unwrap_or_default(),
        },
        ValidationReason::InvalidAmount => DomainError::InvalidAmount { amount, expected },
    };
    AppError::new(AppErrorKind::Domain(domain))
}

/// Within 1% of the price, inclusive.
pub fn amount_within_tolerance(amount: i64, price: i64) -> bool {
    (amount - price).abs() * 100 <= price
}

pub struct TransactionValidator {
    users: Arc<dyn UserRepository>,
    transactions: Arc<dyn TransactionRepository>,
    settings: Arc<PaymentSettings>,
    clock: Arc<dyn Clock>,
}

impl TransactionValidator {
    pub fn new(
        users: Arc<dyn UserRepository>,
        transactions: Arc<dyn TransactionRepository>,
        settings: Arc<PaymentSettings>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            users,
            transactions,
            settings,
            clock,
        }
    }

    /// Runs the checks in order and stops at the first failure.
    pub async fn validate(
        &self,
        user_id: Uuid,
        amount: i64,
    ) -> Result<ValidationOutcome, DatabaseError> {
        let price = self.settings.premium_price().await;

        let Some(user) = self.users.find_by_id(user_id).await? else {
            return Ok(ValidationOutcome::rejected(
                ValidationReason::UserNotFound,
                None,
                price,
            ));
        };

        if user.is_premium {
            return Ok(ValidationOutcome::rejected(
                ValidationReason::AlreadyPremium,
                None,
                price,
            ));
        }

        let now = self.clock.now();
        let history = self.transactions.list_by_user(user_id, HISTORY_LIMIT).await?;

        let pending_cutoff = now - Duration::minutes(PENDING_WINDOW_MINUTES);
        if let Some(pending) = history
            .iter()
            .find(|t| t.status == TransactionStatus::Pending && t.created_at > pending_cutoff)
        {
            debug!(user_id = %user_id, order_id = %pending.order_id, "open pending transaction");
            return Ok(ValidationOutcome::rejected(
                ValidationReason::PendingTransaction,
                Some(pending.clone()),
                price,
            ));
        }

        let success_cutoff = now - Duration::hours(RECENT_SUCCESS_WINDOW_HOURS);
        if let Some(success) = history
            .iter()
            .find(|t| t.status == TransactionStatus::Success && t.updated_at >= success_cutoff)
        {
            return Ok(ValidationOutcome::rejected(
                ValidationReason::RecentSuccess,
                Some(success.clone()),
                price,
            ));
        }

        if !amount_within_tolerance(amount, price) {
            return Ok(ValidationOutcome::rejected(
                ValidationReason::InvalidAmount,
                None,
                price,
            ));
        }

        Ok(ValidationOutcome::ok(price))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tolerance_is_one_percent_inclusive() {
        assert!(amount_within_tolerance(99_000, 99_000));
        assert!(amount_within_tolerance(99_990, 99_000));
        assert!(amount_within_tolerance(98_010, 99_000));
        assert!(!amount_within_tolerance(99_991, 99_000));
        assert!(!amount_within_tolerance(98_009, 99_000));
    }

    #[test]
    fn rejections_map_to_domain_errors() {
        let err = rejection_error(ValidationReason::InvalidAmount, Uuid::nil(), 10, 99_000, None);
        assert_eq!(err.status_code(), 422);
        let err = rejection_error(ValidationReason::PendingTransaction, Uuid::nil(), 99_000, 99_000, None);
        assert_eq!(err.status_code(), 409);
        let err = rejection_error(ValidationReason::UserNotFound, Uuid::nil(), 99_000, 99_000, None);
        assert_eq!(err.status_code(), 404);
    }
}
