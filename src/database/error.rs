use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum DatabaseErrorKind {
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    #[error("connection error: {message}")]
    ConnectionError { message: String },

    #[error("query error: {message}")]
    QueryError { message: String },

    #[error("database error: {message}")]
    Unknown { message: String },
}

#[derive(Debug, Clone, Error)]
#[error("{kind}")]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind }
    }

    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        Self::new(DatabaseErrorKind::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        })
    }

    #[cfg(feature = "database")]
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::RowNotFound => DatabaseErrorKind::NotFound {
                entity: "row".to_string(),
                id: "unknown".to_string(),
            },
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                DatabaseErrorKind::UniqueViolation {
                    constraint: db.constraint().unwrap_or("unknown").to_string(),
                }
            }
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => DatabaseErrorKind::ConnectionError {
                message: err.to_string(),
            },
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                DatabaseErrorKind::QueryError {
                    message: err.to_string(),
                }
            }
            _ => DatabaseErrorKind::Unknown {
                message: err.to_string(),
            },
        };
        Self::new(kind)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::ConnectionError { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::NotFound { .. })
    }
}

impl From<DatabaseError> for crate::error::AppError {
    fn from(err: DatabaseError) -> Self {
        use crate::error::{AppError, AppErrorKind, DomainError, InfrastructureError};

        match &err.kind {
            DatabaseErrorKind::NotFound { entity, id } if entity == "Transaction" => {
                AppError::new(AppErrorKind::Domain(DomainError::TransactionNotFound {
                    transaction_id: id.clone(),
                }))
            }
            DatabaseErrorKind::NotFound { entity, id } if entity == "User" => {
                AppError::new(AppErrorKind::Domain(DomainError::UserNotFound {
                    user_id: id.clone(),
                }))
            }
            _ => AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
                message: err.to_string(),
                is_retryable: err.is_retryable(),
            })),
        }
    }
}
