use crate::database::error::DatabaseError;
use crate::database::models::UserAccount;
use crate::database::repository::UserRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    name: String,
    phone: Option<String>,
    is_premium: bool,
    premium_expires_at: Option<DateTime<Utc>>,
    last_known_ip: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for UserAccount {
    fn from(row: UserRow) -> Self {
        UserAccount {
            id: row.id,
            email: row.email,
            name: row.name,
            phone: row.phone,
            is_premium: row.is_premium,
            premium_expires_at: row.premium_expires_at,
            last_known_ip: row.last_known_ip,
            created_at: row.created_at,
        }
    }
}

pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserAccount>, DatabaseError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, name, phone, is_premium, premium_expires_at,
                    last_known_ip, created_at
             FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(row.map(UserAccount::from))
    }

    async fn grant_lifetime_premium(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE users
             SET is_premium = true, premium_expires_at = NULL, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }

    async fn count_accounts_by_ip(&self, ip: &str, exclude: Uuid) -> Result<i64, DatabaseError> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM users WHERE last_known_ip = $1 AND id <> $2",
        )
        .bind(ip)
        .bind(exclude)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
