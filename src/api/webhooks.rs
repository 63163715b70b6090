use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::AppState;
use crate::middleware::error::request_id;
use crate::payments::types::WebhookRequest;
use crate::services::webhook_processor::WebhookProcessorError;

/// POST /webhooks/{gateway}
///
/// 2xx tells the provider to stop redelivering. Transient failures answer
/// 503 so the provider retries; bad signatures answer 401.
pub async fn handle_webhook(
    State(state): State<AppState>,
    Path(gateway): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let request_id =
        request_id(&headers).unwrap_or_else(|| Uuid::new_v4().to_string());
    info!(gateway = %gateway, request_id = %request_id, "Received webhook");

    let header_pairs = headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v.to_string())));
    let request = match WebhookRequest::from_parts(header_pairs, body.to_vec()) {
        Ok(request) => request,
        Err(e) => {
            warn!(gateway = %gateway, error = %e, "Unparseable webhook body");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"status": "error", "message": "Invalid payload"})),
            )
                .into_response();
        }
    };

    match state
        .webhooks
        .process_webhook(&gateway, &request, &request_id)
        .await
    {
        Ok(outcome) => {
            info!(
                gateway = %gateway,
                order_id = %outcome.order_id,
                action = ?outcome.action,
                "Webhook processed"
            );
            (
                StatusCode::OK,
                Json(json!({"status": "ok", "action": outcome.action})),
            )
                .into_response()
        }
        Err(e) => {
            let status =
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            match &e {
                WebhookProcessorError::InvalidSignature(_) => {
                    warn!(gateway = %gateway, error = %e, "Invalid webhook signature")
                }
                WebhookProcessorError::Malformed(_) | WebhookProcessorError::UnknownGateway(_) => {
                    warn!(gateway = %gateway, error = %e, "Rejected webhook")
                }
                _ => error!(gateway = %gateway, error = %e, "Webhook processing failed"),
            }
            let message = match &e {
                WebhookProcessorError::InvalidSignature(_) => "Invalid signature",
                WebhookProcessorError::Malformed(_) => "Invalid payload",
                WebhookProcessorError::UnknownGateway(_) => "Unknown gateway",
                WebhookProcessorError::GatewayUnavailable(_)
                | WebhookProcessorError::Retryable(_) => "Temporarily unavailable",
                WebhookProcessorError::DatabaseError(_) => "Internal error",
            };
            (status, Json(json!({"status": "error", "message": message}))).into_response()
        }
    }
}
