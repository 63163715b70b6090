use crate::database::error::DatabaseError;
use crate::database::repository::SiteConfigRepository;
use async_trait::async_trait;
use sqlx::PgPool;

/// Key/value rows in `site_config`.
pub struct PgSiteConfigRepository {
    pool: PgPool,
}

impl PgSiteConfigRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SiteConfigRepository for PgSiteConfigRepository {
    async fn get(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        sqlx::query_scalar::<_, String>("SELECT value FROM site_config WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO site_config (key, value) VALUES ($1, $2)
             ON CONFLICT (key) DO UPDATE SET value = $2, updated_at = NOW()",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<(String, String)>, DatabaseError> {
        sqlx::query_as::<_, (String, String)>("SELECT key, value FROM site_config ORDER BY key")
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }
}
