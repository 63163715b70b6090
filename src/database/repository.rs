//! Storage seams used by the payment services.
//!
//! Postgres implementations live next to this module behind the `database`
//! feature; [`crate::database::memory`] backs tests and local runs.

use crate::database::error::DatabaseError;
use crate::database::models::{FraudAuditEntry, NewTransaction, Transaction, UserAccount};
use crate::payments::types::TransactionStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    /// Inserts a `pending` row. Fails with `UniqueViolation` on a reused order id.
    async fn insert(&self, new: NewTransaction) -> Result<Transaction, DatabaseError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Transaction>, DatabaseError>;

    async fn find_by_order_id(&self, order_id: &str)
        -> Result<Option<Transaction>, DatabaseError>;

    /// Compare-and-set on status: writes `new_status` and merges `details_patch`
    /// only while the stored status still equals `expected`.
    /// Returns `None` when another writer got there first.
    async fn update_status(
        &self,
        id: Uuid,
        expected: TransactionStatus,
        new_status: TransactionStatus,
        details_patch: &JsonValue,
    ) -> Result<Option<Transaction>, DatabaseError>;

    /// Newest first.
    async fn list_by_user(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Transaction>, DatabaseError>;

    async fn count_by_status_since(
        &self,
        user_id: Uuid,
        status: TransactionStatus,
        since: DateTime<Utc>,
    ) -> Result<i64, DatabaseError>;

    /// Oldest first.
    async fn find_pending_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transaction>, DatabaseError>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserAccount>, DatabaseError>;

    /// Sets the premium flag with no expiry. Returns false if the user is gone.
    async fn grant_lifetime_premium(&self, id: Uuid) -> Result<bool, DatabaseError>;

    /// Accounts other than `exclude` whose last known IP is `ip`.
    async fn count_accounts_by_ip(&self, ip: &str, exclude: Uuid) -> Result<i64, DatabaseError>;
}

/// Generic key/value site configuration.
#[async_trait]
pub trait SiteConfigRepository: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, DatabaseError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), DatabaseError>;

    async fn get_all(&self) -> Result<Vec<(String, String)>, DatabaseError>;
}

#[async_trait]
pub trait FraudAuditRepository: Send + Sync {
    async fn record(&self, entry: &FraudAuditEntry) -> Result<(), DatabaseError>;
}
