//! JSON envelopes for API responses.
//!
//! Successes are `{success, data, timestamp}`; failures carry an
//! [`ErrorCode`] plus the request id so a support ticket can be matched to
//! the payment logs.

use crate::error::{AppError, ErrorCode};
use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorCode,
    /// Safe to show to the buyer; internal causes stay in the logs.
    pub message: String,
    pub request_id: Option<String>,
    pub timestamp: String,
    /// e.g. the open transaction behind a `PENDING_TRANSACTION` rejection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl ErrorEnvelope {
    pub fn for_error(error: &AppError) -> Self {
        Self {
            error: error.error_code(),
            message: error.user_message(),
            request_id: error.request_id.clone(),
            timestamp: Utc::now().to_rfc3339(),
            details: error.context.as_ref().map(|c| json!({ "context": c })),
            retryable: Some(error.is_retryable()),
        }
    }

    pub fn with_details(mut self, details: JsonValue) -> Self {
        self.details = Some(details);
        self
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let code = self.error_code();

        if status.is_server_error() {
            tracing::error!(
                error = %self,
                code = ?code,
                request_id = ?self.request_id,
                status = status.as_u16(),
                "Payment API request failed"
            );
        } else {
            tracing::warn!(
                error = %self,
                code = ?code,
                request_id = ?self.request_id,
                status = status.as_u16(),
                "Payment API request rejected"
            );
        }

        (status, Json(ErrorEnvelope::for_error(&self))).into_response()
    }
}

pub fn success_envelope<T: Serialize>(data: T) -> Json<JsonValue> {
    Json(json!({
        "success": true,
        "data": data,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// Id set by the request-id layer, or forwarded by the caller.
pub fn request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
