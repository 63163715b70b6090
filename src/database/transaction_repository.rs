use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::models::{NewTransaction, Transaction};
use crate::database::repository::TransactionRepository;
use crate::payments::types::TransactionStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

const COLUMNS: &str = "id, order_id, user_id, amount, status, payment_method, gateway, \
                       details, created_at, updated_at";

#[derive(Debug, Clone, FromRow)]
struct TransactionRow {
    id: Uuid,
    order_id: String,
    user_id: Uuid,
    amount: i64,
    status: String,
    payment_method: String,
    gateway: String,
    details: JsonValue,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = DatabaseError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let decode = |field: &str, value: &str| {
            DatabaseError::new(DatabaseErrorKind::QueryError {
                message: format!("unexpected {} '{}' for transaction {}", field, value, row.id),
            })
        };
        Ok(Transaction {
            id: row.id,
            status: row
                .status
                .parse()
                .map_err(|_| decode("status", &row.status))?,
            gateway: row
                .gateway
                .parse()
                .map_err(|_| decode("gateway", &row.gateway))?,
            order_id: row.order_id,
            user_id: row.user_id,
            amount: row.amount,
            payment_method: row.payment_method,
            details: row.details,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_transactions(rows: Vec<TransactionRow>) -> Result<Vec<Transaction>, DatabaseError> {
    rows.into_iter().map(Transaction::try_from).collect()
}

/// Ledger of premium transactions in `premium_transactions`.
pub struct PgTransactionRepository {
    pool: PgPool,
}

impl PgTransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionRepository for PgTransactionRepository {
    async fn insert(&self, new: NewTransaction) -> Result<Transaction, DatabaseError> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "INSERT INTO premium_transactions
             (order_id, user_id, amount, status, payment_method, gateway, details)
             VALUES ($1, $2, $3, 'pending', $4, $5, $6)
             RETURNING {}",
            COLUMNS
        ))
        .bind(&new.order_id)
        .bind(new.user_id)
        .bind(new.amount)
        .bind(&new.payment_method)
        .bind(new.gateway.as_str())
        .bind(&new.details)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.try_into()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Transaction>, DatabaseError> {
        sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM premium_transactions WHERE id = $1",
            COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(Transaction::try_from)
        .transpose()
    }

    async fn find_by_order_id(
        &self,
        order_id: &str,
    ) -> Result<Option<Transaction>, DatabaseError> {
        sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM premium_transactions WHERE order_id = $1",
            COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(Transaction::try_from)
        .transpose()
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected: TransactionStatus,
        new_status: TransactionStatus,
        details_patch: &JsonValue,
    ) -> Result<Option<Transaction>, DatabaseError> {
        sqlx::query_as::<_, TransactionRow>(&format!(
            "UPDATE premium_transactions
             SET status = $3, details = details || $4, updated_at = NOW()
             WHERE id = $1 AND status = $2
             RETURNING {}",
            COLUMNS
        ))
        .bind(id)
        .bind(expected.as_str())
        .bind(new_status.as_str())
        .bind(details_patch)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(Transaction::try_from)
        .transpose()
    }

    async fn list_by_user(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Transaction>, DatabaseError> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM premium_transactions
             WHERE user_id = $1
             ORDER BY created_at DESC
             LIMIT $2",
            COLUMNS
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        into_transactions(rows)
    }

    async fn count_by_status_since(
        &self,
        user_id: Uuid,
        status: TransactionStatus,
        since: DateTime<Utc>,
    ) -> Result<i64, DatabaseError> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM premium_transactions
             WHERE user_id = $1 AND status = $2 AND updated_at >= $3",
        )
        .bind(user_id)
        .bind(status.as_str())
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find_pending_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transaction>, DatabaseError> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM premium_transactions
             WHERE status = 'pending' AND created_at < $1
             ORDER BY created_at ASC
             LIMIT $2",
            COLUMNS
        ))
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        into_transactions(rows)
    }
}
