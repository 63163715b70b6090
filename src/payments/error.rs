use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    /// Required credentials missing or malformed. Fatal for that gateway only.
    #[error("Configuration error: gateway={gateway}, message={message}")]
    ConfigurationError { gateway: String, message: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Timeout: {message}")]
    TimeoutError { message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimitError {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("Webhook verification failed: {message}")]
    WebhookVerificationError { message: String },

    #[error("Provider error: provider={provider}, message={message}")]
    ProviderError {
        provider: String,
        message: String,
        provider_code: Option<String>,
        retryable: bool,
    },
}

impl PaymentError {
    pub fn configuration(gateway: impl Into<String>, message: impl Into<String>) -> Self {
        PaymentError::ConfigurationError {
            gateway: gateway.into(),
            message: message.into(),
        }
    }

    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        PaymentError::ProviderError {
            provider: provider.into(),
            message: message.into(),
            provider_code: None,
            retryable: false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::ValidationError { .. } => false,
            PaymentError::ConfigurationError { .. } => false,
            PaymentError::NetworkError { .. } => true,
            PaymentError::TimeoutError { .. } => true,
            PaymentError::RateLimitError { .. } => true,
            PaymentError::WebhookVerificationError { .. } => false,
            PaymentError::ProviderError { retryable, .. } => *retryable,
        }
    }

    pub fn provider_code(&self) -> Option<&str> {
        match self {
            PaymentError::ProviderError { provider_code, .. } => provider_code.as_deref(),
            _ => None,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::ValidationError { .. } => 400,
            PaymentError::ConfigurationError { .. } => 500,
            PaymentError::NetworkError { .. } => 503,
            PaymentError::TimeoutError { .. } => 504,
            PaymentError::RateLimitError { .. } => 429,
            PaymentError::WebhookVerificationError { .. } => 401,
            PaymentError::ProviderError { .. } => 502,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PaymentError::ValidationError { message, .. } => message.clone(),
            PaymentError::ConfigurationError { .. } => {
                "This payment method is not available right now".to_string()
            }
            PaymentError::NetworkError { .. } | PaymentError::TimeoutError { .. } => {
                "Payment provider is temporarily unavailable".to_string()
            }
            PaymentError::RateLimitError { .. } => {
                "Too many requests to payment provider. Please retry shortly".to_string()
            }
            PaymentError::WebhookVerificationError { .. } => {
                "Invalid webhook signature".to_string()
            }
            PaymentError::ProviderError { .. } => "Payment provider returned an error".to_string(),
        }
    }
}

impl From<PaymentError> for crate::error::AppError {
    fn from(err: PaymentError) -> Self {
        use crate::error::{
            AppError, AppErrorKind, ExternalError, InfrastructureError, ValidationError,
        };

        let display = err.to_string();
        let kind = match err {
            PaymentError::ValidationError { message, field } => {
                AppErrorKind::Validation(ValidationError::InvalidField {
                    field: field.unwrap_or_else(|| "request".to_string()),
                    reason: message,
                })
            }
            PaymentError::ConfigurationError { gateway, message } => {
                AppErrorKind::Infrastructure(InfrastructureError::Configuration {
                    message: format!("{}: {}", gateway, message),
                })
            }
            PaymentError::TimeoutError { .. } => AppErrorKind::External(ExternalError::Timeout {
                service: "payments".to_string(),
                timeout_secs: 30,
            }),
            PaymentError::RateLimitError {
                retry_after_seconds,
                ..
            } => AppErrorKind::External(ExternalError::RateLimit {
                service: "payments".to_string(),
                retry_after: retry_after_seconds,
            }),
            PaymentError::WebhookVerificationError { message } => {
                AppErrorKind::External(ExternalError::WebhookVerification {
                    provider: "payments".to_string(),
                    message,
                })
            }
            PaymentError::ProviderError {
                provider,
                retryable,
                ..
            } => AppErrorKind::External(ExternalError::PaymentProvider {
                provider,
                message: display,
                is_retryable: retryable,
            }),
            PaymentError::NetworkError { .. } => {
                AppErrorKind::External(ExternalError::PaymentProvider {
                    provider: "payments".to_string(),
                    message: display,
                    is_retryable: true,
                })
            }
        };

        AppError::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_http_status_mapping_is_correct() {
        assert_eq!(
            PaymentError::ValidationError {
                message: "bad".to_string(),
                field: None
            }
            .http_status_code(),
            400
        );
        assert_eq!(
            PaymentError::RateLimitError {
                message: "limited".to_string(),
                retry_after_seconds: Some(30)
            }
            .http_status_code(),
            429
        );
        assert_eq!(
            PaymentError::configuration("duitku", "DUITKU_API_KEY is empty").http_status_code(),
            500
        );
    }

    #[test]
    fn retryable_flags_are_set() {
        assert!(PaymentError::NetworkError {
            message: "connection reset".to_string()
        }
        .is_retryable());
        assert!(PaymentError::TimeoutError {
            message: "30s elapsed".to_string()
        }
        .is_retryable());
        assert!(!PaymentError::provider("midtrans", "invalid gross_amount").is_retryable());
        assert!(!PaymentError::configuration("paypal", "missing secret").is_retryable());
    }
}
