//! Advisory fraud scoring.
//!
//! The detector never blocks a payment. It records an audit entry whenever
//! something looks off and raises an admin alert for high-risk results.

use crate::clock::Clock;
use crate::database::error::DatabaseError;
use crate::database::models::FraudAuditEntry;
use crate::database::repository::{FraudAuditRepository, TransactionRepository, UserRepository};
use crate::payments::settings::PaymentSettings;
use crate::payments::types::TransactionStatus;
use crate::services::notification::{AdminAlert, AdminAlertEmitter};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }

    pub fn from_reason_count(count: usize) -> Self {
        match count {
            0 => RiskLevel::Low,
            1 | 2 => RiskLevel::Medium,
            _ => RiskLevel::High,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum FraudReason {
    MultipleRecentFailures,
    UnusualAmount,
    MultipleAccountsSameIp,
    RapidTransactions,
    NewAccount,
    ErrorInFraudCheck,
}

impl FraudReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FraudReason::MultipleRecentFailures => "multiple_recent_failures",
            FraudReason::UnusualAmount => "unusual_amount",
            FraudReason::MultipleAccountsSameIp => "multiple_accounts_same_ip",
            FraudReason::RapidTransactions => "rapid_transactions",
            FraudReason::NewAccount => "new_account",
            FraudReason::ErrorInFraudCheck => "error_in_fraud_check",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FraudCheckResult {
    pub is_suspicious: bool,
    pub risk_level: RiskLevel,
    pub reasons: BTreeSet<FraudReason>,
}

impl FraudCheckResult {
    fn from_reasons(reasons: BTreeSet<FraudReason>) -> Self {
        Self {
            is_suspicious: !reasons.is_empty(),
            risk_level: RiskLevel::from_reason_count(reasons.len()),
            reasons,
        }
    }

    /// What a failing detector reports instead of propagating.
    pub fn degraded() -> Self {
        Self {
            is_suspicious: false,
            risk_level: RiskLevel::Low,
            reasons: BTreeSet::from([FraudReason::ErrorInFraudCheck]),
        }
    }

    pub fn reason_names(&self) -> Vec<String> {
        self.reasons.iter().map(|r| r.as_str().to_string()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct FraudThresholds {
    pub failure_window: Duration,
    pub max_recent_failures: i64,
    /// Percent deviation from the configured price.
    pub amount_deviation_percent: i64,
    pub max_accounts_per_ip: i64,
    pub rapid_interval: Duration,
    pub new_account_age: Duration,
}

impl Default for FraudThresholds {
    fn default() -> Self {
        Self {
            failure_window: Duration::hours(1),
            max_recent_failures: 5,
            amount_deviation_percent: 10,
            max_accounts_per_ip: 3,
            rapid_interval: Duration::seconds(30),
            new_account_age: Duration::hours(1),
        }
    }
}

/// Transaction facts the detector cannot look up itself.
#[derive(Debug, Clone, Default)]
pub struct FraudCheckDetails {
    pub amount: i64,
    /// Overrides the user's last known IP when present.
    pub ip_address: Option<String>,
    /// True when the transaction being scored is not yet in the ledger,
    /// so "now" counts as the most recent transaction.
    pub pre_commit: bool,
}

pub struct FraudDetector {
    users: Arc<dyn UserRepository>,
    transactions: Arc<dyn TransactionRepository>,
    audit: Arc<dyn FraudAuditRepository>,
    settings: Arc<PaymentSettings>,
    alerts: AdminAlertEmitter,
    clock: Arc<dyn Clock>,
    thresholds: FraudThresholds,
}

impl FraudDetector {
    pub fn new(
        users: Arc<dyn UserRepository>,
        transactions: Arc<dyn TransactionRepository>,
        audit: Arc<dyn FraudAuditRepository>,
        settings: Arc<PaymentSettings>,
        alerts: AdminAlertEmitter,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            users,
            transactions,
            audit,
            settings,
            alerts,
            clock,
            thresholds: FraudThresholds::default(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: FraudThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Scores a transaction. Never fails; internal errors degrade to a
    /// low-risk result tagged `error_in_fraud_check`.
    pub async fn check(
        &self,
        user_id: Uuid,
        transaction_ref: &str,
        details: &FraudCheckDetails,
    ) -> FraudCheckResult {
        let result = match self.collect_reasons(user_id, details).await {
            Ok(reasons) => FraudCheckResult::from_reasons(reasons),
            Err(e) => {
                error!(
                    user_id = %user_id,
                    transaction_ref = %transaction_ref,
                    error = %e,
                    "Fraud check failed, continuing without score"
                );
                FraudCheckResult::degraded()
            }
        };

        if !result.reasons.is_empty() {
            self.record(user_id, transaction_ref, details, &result).await;
        }

        if result.risk_level == RiskLevel::High {
            warn!(
                user_id = %user_id,
                transaction_ref = %transaction_ref,
                reasons = ?result.reason_names(),
                "High fraud risk"
            );
            self.alerts.emit(AdminAlert::warning(
                "fraud_high_risk",
                format!("High fraud risk on {}", transaction_ref),
                json!({
                    "user_id": user_id,
                    "transaction_ref": transaction_ref,
                    "reasons": result.reason_names(),
                }),
            ));
        }

        result
    }

    async fn collect_reasons(
        &self,
        user_id: Uuid,
        details: &FraudCheckDetails,
    ) -> Result<BTreeSet<FraudReason>, DatabaseError> {
        let now = self.clock.now();
        let t = &self.thresholds;
        let mut reasons = BTreeSet::new();

        let failures = self
            .transactions
            .count_by_status_since(user_id, TransactionStatus::Failed, now - t.failure_window)
            .await?;
        if failures >= t.max_recent_failures {
            reasons.insert(FraudReason::MultipleRecentFailures);
        }

        let price = self.settings.premium_price().await;
        if (details.amount - price).abs() * 100 > price * t.amount_deviation_percent {
            reasons.insert(FraudReason::UnusualAmount);
        }

        let user = self.users.find_by_id(user_id).await?;

        let ip = details
            .ip_address
            .clone()
            .or_else(|| user.as_ref().and_then(|u| u.last_known_ip.clone()));
        if let Some(ip) = ip.filter(|ip| !ip.is_empty()) {
            let others = self.users.count_accounts_by_ip(&ip, user_id).await?;
            if others > t.max_accounts_per_ip {
                reasons.insert(FraudReason::MultipleAccountsSameIp);
            }
        }

        let recent = self.transactions.list_by_user(user_id, 2).await?;
        let mut times: Vec<DateTime<Utc>> = recent.iter().map(|tx| tx.created_at).collect();
        if details.pre_commit {
            times.insert(0, now);
        }
        if let [latest, previous, ..] = times.as_slice() {
            if *latest - *previous < t.rapid_interval {
                reasons.insert(FraudReason::RapidTransactions);
            }
        }

        if let Some(user) = &user {
            if now - user.created_at < t.new_account_age {
                reasons.insert(FraudReason::NewAccount);
            }
        }

        Ok(reasons)
    }

    async fn record(
        &self,
        user_id: Uuid,
        transaction_ref: &str,
        details: &FraudCheckDetails,
        result: &FraudCheckResult,
    ) {
        let entry = FraudAuditEntry {
            user_id,
            transaction_ref: transaction_ref.to_string(),
            risk_level: result.risk_level.as_str().to_string(),
            reasons: result.reason_names(),
            details: json!({
                "amount": details.amount,
                "ip_address": details.ip_address,
            }),
            created_at: self.clock.now(),
        };
        match self.audit.record(&entry).await {
            Ok(()) => info!(
                user_id = %user_id,
                transaction_ref = %transaction_ref,
                risk_level = result.risk_level.as_str(),
                "Fraud audit entry recorded"
            ),
            Err(e) => warn!(
                user_id = %user_id,
                transaction_ref = %transaction_ref,
                error = %e,
                "Failed to record fraud audit entry"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_level_follows_reason_count() {
        assert_eq!(RiskLevel::from_reason_count(0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_reason_count(1), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_reason_count(2), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_reason_count(3), RiskLevel::High);
        assert_eq!(RiskLevel::from_reason_count(5), RiskLevel::High);
    }

    #[test]
    fn degraded_result_is_low_and_not_suspicious() {
        let r = FraudCheckResult::degraded();
        assert!(!r.is_suspicious);
        assert_eq!(r.risk_level, RiskLevel::Low);
        assert_eq!(r.reason_names(), vec!["error_in_fraud_check"]);
    }
}
