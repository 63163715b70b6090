//! In-process stores for tests and `SKIP_EXTERNALS` runs.

use crate::clock::Clock;
use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::models::{
    merge_details, FraudAuditEntry, NewTransaction, Transaction, UserAccount,
};
use crate::database::repository::{
    FraudAuditRepository, SiteConfigRepository, TransactionRepository, UserRepository,
};
use crate::payments::types::TransactionStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

fn injected_failure(what: &str) -> DatabaseError {
    DatabaseError::new(DatabaseErrorKind::ConnectionError {
        message: format!("{} unavailable (injected)", what),
    })
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

pub struct InMemoryTransactionRepository {
    clock: Arc<dyn Clock>,
    rows: RwLock<Vec<Transaction>>,
    failing: AtomicBool,
}

impl InMemoryTransactionRepository {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            rows: RwLock::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    /// Stores a row verbatim, timestamps included.
    pub async fn seed(&self, transaction: Transaction) {
        self.rows.write().await.push(transaction);
    }

    /// Makes every subsequent call fail with a connection error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn all(&self) -> Vec<Transaction> {
        self.rows.read().await.clone()
    }

    fn check(&self) -> Result<(), DatabaseError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(injected_failure("transactions"));
        }
        Ok(())
    }
}

#[async_trait]
impl TransactionRepository for InMemoryTransactionRepository {
    async fn insert(&self, new: NewTransaction) -> Result<Transaction, DatabaseError> {
        self.check()?;
        let mut rows = self.rows.write().await;
        if rows.iter().any(|t| t.order_id == new.order_id) {
            return Err(DatabaseError::new(DatabaseErrorKind::UniqueViolation {
                constraint: "transactions_order_id_key".to_string(),
            }));
        }
        let now = self.clock.now();
        let transaction = Transaction {
            id: Uuid::new_v4(),
            order_id: new.order_id,
            user_id: new.user_id,
            amount: new.amount,
            status: TransactionStatus::Pending,
            payment_method: new.payment_method,
            gateway: new.gateway,
            details: new.details,
            created_at: now,
            updated_at: now,
        };
        rows.push(transaction.clone());
        Ok(transaction)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Transaction>, DatabaseError> {
        self.check()?;
        Ok(self.rows.read().await.iter().find(|t| t.id == id).cloned())
    }

    async fn find_by_order_id(
        &self,
        order_id: &str,
    ) -> Result<Option<Transaction>, DatabaseError> {
        self.check()?;
        Ok(self
            .rows
            .read()
            .await
            .iter()
            .find(|t| t.order_id == order_id)
            .cloned())
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected: TransactionStatus,
        new_status: TransactionStatus,
        details_patch: &JsonValue,
    ) -> Result<Option<Transaction>, DatabaseError> {
        self.check()?;
        let now = self.clock.now();
        let mut rows = self.rows.write().await;
        let Some(row) = rows.iter_mut().find(|t| t.id == id) else {
            return Ok(None);
        };
        if row.status != expected {
            return Ok(None);
        }
        row.status = new_status;
        row.details = merge_details(&row.details, details_patch);
        row.updated_at = now;
        Ok(Some(row.clone()))
    }

    async fn list_by_user(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Transaction>, DatabaseError> {
        self.check()?;
        let rows = self.rows.read().await;
        let mut matching: Vec<(usize, &Transaction)> = rows
            .iter()
            .enumerate()
            .filter(|(_, t)| t.user_id == user_id)
            .collect();
        // Newest first; insertion order breaks timestamp ties.
        matching.sort_by(|(ia, a), (ib, b)| b.created_at.cmp(&a.created_at).then(ib.cmp(ia)));
        Ok(matching
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|(_, t)| t.clone())
            .collect())
    }

    async fn count_by_status_since(
        &self,
        user_id: Uuid,
        status: TransactionStatus,
        since: DateTime<Utc>,
    ) -> Result<i64, DatabaseError> {
        self.check()?;
        Ok(self
            .rows
            .read()
            .await
            .iter()
            .filter(|t| t.user_id == user_id && t.status == status && t.updated_at >= since)
            .count() as i64)
    }

    async fn find_pending_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transaction>, DatabaseError> {
        self.check()?;
        let mut pending: Vec<Transaction> = self
            .rows
            .read()
            .await
            .iter()
            .filter(|t| t.status == TransactionStatus::Pending && t.created_at < cutoff)
            .cloned()
            .collect();
        pending.sort_by_key(|t| t.created_at);
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryUserRepository {
    users: RwLock<HashMap<Uuid, UserAccount>>,
    upgrades: AtomicU64,
    failing_upgrades: AtomicBool,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, user: UserAccount) {
        self.users.write().await.insert(user.id, user);
    }

    /// Number of successful premium grants so far.
    pub fn upgrade_count(&self) -> u64 {
        self.upgrades.load(Ordering::SeqCst)
    }

    pub fn set_failing_upgrades(&self, failing: bool) {
        self.failing_upgrades.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserAccount>, DatabaseError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn grant_lifetime_premium(&self, id: Uuid) -> Result<bool, DatabaseError> {
        if self.failing_upgrades.load(Ordering::SeqCst) {
            return Err(injected_failure("users"));
        }
        let mut users = self.users.write().await;
        let Some(user) = users.get_mut(&id) else {
            return Ok(false);
        };
        user.is_premium = true;
        user.premium_expires_at = None;
        self.upgrades.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn count_accounts_by_ip(&self, ip: &str, exclude: Uuid) -> Result<i64, DatabaseError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .filter(|u| u.id != exclude && u.last_known_ip.as_deref() == Some(ip))
            .count() as i64)
    }
}

// ---------------------------------------------------------------------------
// Site config
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemorySiteConfigRepository {
    values: RwLock<HashMap<String, String>>,
}

impl InMemorySiteConfigRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: RwLock::new(
                values
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl SiteConfigRepository for InMemorySiteConfigRepository {
    async fn get(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        self.values
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<(String, String)>, DatabaseError> {
        let mut all: Vec<(String, String)> = self
            .values
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        all.sort();
        Ok(all)
    }
}

// ---------------------------------------------------------------------------
// Fraud audit
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryFraudAuditRepository {
    entries: RwLock<Vec<FraudAuditEntry>>,
}

impl InMemoryFraudAuditRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<FraudAuditEntry> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl FraudAuditRepository for InMemoryFraudAuditRepository {
    async fn record(&self, entry: &FraudAuditEntry) -> Result<(), DatabaseError> {
        self.entries.write().await.push(entry.clone());
        Ok(())
    }
}
