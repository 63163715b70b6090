//! Application-level error handling
//!
//! Unified error type for the HTTP surface with status mapping, user-facing
//! messages and machine-readable error codes. Layer-specific errors
//! (`PaymentError`, `DatabaseError`, ...) convert into [`AppError`] at the edge.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic handling by clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "USER_NOT_FOUND")]
    UserNotFound,
    #[serde(rename = "ALREADY_PREMIUM")]
    AlreadyPremium,
    #[serde(rename = "PENDING_TRANSACTION")]
    PendingTransaction,
    #[serde(rename = "RECENT_SUCCESS")]
    RecentSuccess,
    #[serde(rename = "INVALID_AMOUNT")]
    InvalidAmount,
    #[serde(rename = "TRANSACTION_NOT_FOUND")]
    TransactionNotFound,
    #[serde(rename = "TRANSACTION_NOT_CANCELLABLE")]
    TransactionNotCancellable,
    #[serde(rename = "RECONCILIATION_CONFLICT")]
    ReconciliationConflict,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (401, 429, 502, 504)
    #[serde(rename = "PAYMENT_PROVIDER_ERROR")]
    PaymentProviderError,
    #[serde(rename = "WEBHOOK_VERIFICATION_FAILED")]
    WebhookVerificationFailed,
    #[serde(rename = "RATE_LIMIT_ERROR")]
    RateLimitError,
    #[serde(rename = "EXTERNAL_SERVICE_TIMEOUT")]
    ExternalServiceTimeout,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Business-rule failures around the premium purchase
#[derive(Debug, Clone)]
pub enum DomainError {
    UserNotFound { user_id: String },
    AlreadyPremium { user_id: String },
    /// Another payment is still open; clients can resume it instead.
    PendingTransaction { transaction_id: String, order_id: String },
    RecentSuccess { transaction_id: String },
    InvalidAmount { amount: i64, expected: i64 },
    TransactionNotFound { transaction_id: String },
    TransactionNotCancellable { transaction_id: String, status: String },
    ReconciliationConflict {
        transaction_id: String,
        current: String,
        observed: String,
    },
}

/// Infrastructure-level errors (database, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    Configuration { message: String },
}

/// Payment gateway failures
#[derive(Debug, Clone)]
pub enum ExternalError {
    PaymentProvider {
        provider: String,
        message: String,
        is_retryable: bool,
    },
    WebhookVerification { provider: String, message: String },
    RateLimit {
        service: String,
        retry_after: Option<u64>,
    },
    Timeout { service: String, timeout_secs: u64 },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    UnknownGateway { gateway: String },
    MissingField { field: String },
    InvalidField { field: String, reason: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::UserNotFound { .. } => 404,
                DomainError::AlreadyPremium { .. } => 409,
                DomainError::PendingTransaction { .. } => 409,
                DomainError::RecentSuccess { .. } => 409,
                DomainError::InvalidAmount { .. } => 422,
                DomainError::TransactionNotFound { .. } => 404,
                DomainError::TransactionNotCancellable { .. } => 409,
                DomainError::ReconciliationConflict { .. } => 409,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => 502,
                ExternalError::WebhookVerification { .. } => 401,
                ExternalError::RateLimit { .. } => 429,
                ExternalError::Timeout { .. } => 504,
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::UserNotFound { .. } => ErrorCode::UserNotFound,
                DomainError::AlreadyPremium { .. } => ErrorCode::AlreadyPremium,
                DomainError::PendingTransaction { .. } => ErrorCode::PendingTransaction,
                DomainError::RecentSuccess { .. } => ErrorCode::RecentSuccess,
                DomainError::InvalidAmount { .. } => ErrorCode::InvalidAmount,
                DomainError::TransactionNotFound { .. } => ErrorCode::TransactionNotFound,
                DomainError::TransactionNotCancellable { .. } => {
                    ErrorCode::TransactionNotCancellable
                }
                DomainError::ReconciliationConflict { .. } => ErrorCode::ReconciliationConflict,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => ErrorCode::PaymentProviderError,
                ExternalError::WebhookVerification { .. } => ErrorCode::WebhookVerificationFailed,
                ExternalError::RateLimit { .. } => ErrorCode::RateLimitError,
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::UserNotFound { user_id } => format!("User '{}' not found", user_id),
                DomainError::AlreadyPremium { .. } => {
                    "This account already has lifetime premium".to_string()
                }
                DomainError::PendingTransaction { order_id, .. } => format!(
                    "A payment ({}) is already in progress. Please complete or cancel it first",
                    order_id
                ),
                DomainError::RecentSuccess { .. } => {
                    "A payment for this account succeeded recently".to_string()
                }
                DomainError::InvalidAmount { amount, expected } => format!(
                    "Amount {} does not match the current premium price of {}",
                    amount, expected
                ),
                DomainError::TransactionNotFound { transaction_id } => {
                    format!("Transaction '{}' not found", transaction_id)
                }
                DomainError::TransactionNotCancellable { status, .. } => {
                    format!("Only pending transactions can be cancelled (status: {})", status)
                }
                DomainError::ReconciliationConflict { transaction_id, .. } => format!(
                    "Transaction '{}' is already final and was not changed",
                    transaction_id
                ),
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider {
                    provider,
                    is_retryable,
                    ..
                } => {
                    if *is_retryable {
                        format!(
                            "Payment provider ({}) is temporarily unavailable. Please try again",
                            provider
                        )
                    } else {
                        "Payment processing failed. Please contact support".to_string()
                    }
                }
                ExternalError::WebhookVerification { .. } => {
                    "Invalid webhook signature".to_string()
                }
                ExternalError::RateLimit {
                    service,
                    retry_after,
                } => match retry_after {
                    Some(secs) => format!(
                        "Rate limit exceeded for {}. Please try again in {} seconds",
                        service, secs
                    ),
                    None => format!("Rate limit exceeded for {}. Please try again later", service),
                },
                ExternalError::Timeout {
                    service,
                    timeout_secs,
                } => format!(
                    "{} request timed out after {} seconds. Please try again",
                    service, timeout_secs
                ),
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::UnknownGateway { gateway } => {
                    format!("Unknown payment gateway '{}'", gateway)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid value for '{}': {}", field, reason)
                }
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { is_retryable, .. } => *is_retryable,
                ExternalError::WebhookVerification { .. } => false,
                ExternalError::RateLimit { .. } => true,
                ExternalError::Timeout { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

// From<DatabaseError> lives in database/error.rs, From<PaymentError> in payments/error.rs.

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_transaction_error() {
        let error = AppError::new(AppErrorKind::Domain(DomainError::PendingTransaction {
            transaction_id: "2f1c".to_string(),
            order_id: "PREM-20260101000000-ABCDEF12".to_string(),
        }));

        assert_eq!(error.status_code(), 409);
        assert_eq!(error.error_code(), ErrorCode::PendingTransaction);
        assert!(error.user_message().contains("PREM-20260101000000-ABCDEF12"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_rate_limit_error() {
        let error = AppError::new(AppErrorKind::External(ExternalError::RateLimit {
            service: "paypal".to_string(),
            retry_after: Some(60),
        }));

        assert_eq!(error.status_code(), 429);
        assert_eq!(error.error_code(), ErrorCode::RateLimitError);
        assert!(error.is_retryable());
    }

    #[test]
    fn test_validation_error() {
        let error = AppError::new(AppErrorKind::Validation(ValidationError::UnknownGateway {
            gateway: "stripe".to_string(),
        }));

        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::ValidationError);
        assert!(!error.is_retryable());
    }
}
