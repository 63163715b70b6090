use crate::database::error::DatabaseError;
use crate::database::models::FraudAuditEntry;
use crate::database::repository::FraudAuditRepository;
use async_trait::async_trait;
use sqlx::PgPool;

pub struct PgFraudAuditRepository {
    pool: PgPool,
}

impl PgFraudAuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FraudAuditRepository for PgFraudAuditRepository {
    async fn record(&self, entry: &FraudAuditEntry) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO fraud_audit_log
             (user_id, transaction_ref, risk_level, reasons, details, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(entry.user_id)
        .bind(&entry.transaction_ref)
        .bind(&entry.risk_level)
        .bind(&entry.reasons)
        .bind(&entry.details)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }
}
