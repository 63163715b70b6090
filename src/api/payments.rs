use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

use super::AppState;
use crate::database::models::Transaction;
use crate::error::{AppError, AppErrorKind, ExternalError, ValidationError};
use crate::middleware::error::{request_id, success_envelope, ErrorEnvelope};
use crate::payments::types::{GatewayName, TransactionStatus};
use crate::services::payment_orchestrator::{PaymentCreation, PremiumPaymentRequest};
use crate::services::transaction_validator::rejection_error;

#[derive(Debug, Deserialize)]
pub struct CreatePremiumPaymentBody {
    pub user_id: Uuid,
    pub gateway: Option<String>,
    pub payment_method: Option<String>,
    pub amount: Option<i64>,
    pub success_url: Option<String>,
    pub failure_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelPaymentBody {
    pub user_id: Option<Uuid>,
}

/// What clients see of a ledger row. Provider details stay server-side.
#[derive(Debug, Serialize)]
pub struct TransactionView {
    pub id: Uuid,
    pub order_id: String,
    pub status: TransactionStatus,
    pub amount: i64,
    pub gateway: GatewayName,
    pub payment_method: String,
    pub redirect_url: Option<String>,
    pub premium_granted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Transaction> for TransactionView {
    fn from(tx: &Transaction) -> Self {
        Self {
            id: tx.id,
            order_id: tx.order_id.clone(),
            status: tx.status,
            amount: tx.amount,
            gateway: tx.gateway,
            payment_method: tx.payment_method.clone(),
            redirect_url: tx.redirect_url().map(str::to_string),
            premium_granted: tx.premium_granted(),
            created_at: tx.created_at,
            updated_at: tx.updated_at,
        }
    }
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
}

/// POST /api/payments/premium
pub async fn create_premium_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreatePremiumPaymentBody>,
) -> Result<Response, AppError> {
    let request_id = request_id(&headers);
    let tag = |e: AppError| match &request_id {
        Some(id) => e.with_request_id(id.clone()),
        None => e,
    };

    let gateway = body
        .gateway
        .as_deref()
        .filter(|g| !g.trim().is_empty())
        .map(|g| {
            GatewayName::from_str(g).map_err(|_| {
                AppError::new(AppErrorKind::Validation(ValidationError::UnknownGateway {
                    gateway: g.to_string(),
                }))
            })
        })
        .transpose()
        .map_err(&tag)?;

    let request = PremiumPaymentRequest {
        user_id: body.user_id,
        gateway,
        payment_method: body.payment_method.unwrap_or_default(),
        amount: body.amount,
        ip_address: client_ip(&headers),
        success_url: body.success_url,
        failure_url: body.failure_url,
    };

    let creation = state
        .orchestrator
        .create_premium_payment(request)
        .await
        .map_err(&tag)?;

    match creation {
        PaymentCreation::Created {
            transaction,
            redirect_url,
            fraud,
        } => {
            info!(
                transaction_id = %transaction.id,
                order_id = %transaction.order_id,
                risk_level = fraud.risk_level.as_str(),
                "Premium payment created via API"
            );
            Ok((
                StatusCode::CREATED,
                success_envelope(json!({
                    "transaction": TransactionView::from(&transaction),
                    "redirect_url": redirect_url,
                })),
            )
                .into_response())
        }
        PaymentCreation::Rejected {
            reason,
            existing_transaction,
            expected_amount,
        } => {
            let error = tag(rejection_error(
                reason,
                body.user_id,
                body.amount.unwrap_or(expected_amount),
                expected_amount,
                existing_transaction.as_ref(),
            ));
            let status = StatusCode::from_u16(error.status_code())
                .unwrap_or(StatusCode::UNPROCESSABLE_ENTITY);
            let mut response = ErrorEnvelope::for_error(&error);
            if let Some(existing) = &existing_transaction {
                response = response.with_details(json!({
                    "existing_transaction": TransactionView::from(existing),
                }));
            }
            Ok((status, Json(response)).into_response())
        }
        PaymentCreation::GatewayFailed { gateway, error } => {
            Err(tag(AppError::new(AppErrorKind::External(
                ExternalError::PaymentProvider {
                    provider: gateway.to_string(),
                    message: error,
                    is_retryable: true,
                },
            ))))
        }
    }
}

/// GET /api/payments/{id}
///
/// Pending rows are re-checked with their gateway before answering.
pub async fn get_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let request_id = request_id(&headers);
    let check = state.orchestrator.check_status(id).await.map_err(|e| match &request_id {
        Some(rid) => e.with_request_id(rid.clone()),
        None => e,
    })?;

    Ok(success_envelope(json!({
        "transaction": TransactionView::from(&check.transaction),
        "observed_status": check.observed,
        "verification_error": check.verification_error,
    })))
}

/// POST /api/payments/{id}/cancel
pub async fn cancel_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let request_id = request_id(&headers);
    let tag = |e: AppError| match &request_id {
        Some(rid) => e.with_request_id(rid.clone()),
        None => e,
    };

    let body: CancelPaymentBody = if body.is_empty() {
        CancelPaymentBody::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            tag(AppError::new(AppErrorKind::Validation(
                ValidationError::InvalidField {
                    field: "body".to_string(),
                    reason: e.to_string(),
                },
            )))
        })?
    };

    let outcome = state
        .cancellation
        .cancel(id, body.user_id)
        .await
        .map_err(&tag)?;

    Ok(success_envelope(json!({
        "transaction": TransactionView::from(&outcome.transaction),
        "remote_cancelled": outcome.remote_cancelled,
        "message": outcome.message,
    })))
}

/// GET /api/gateways
pub async fn list_gateways(State(state): State<AppState>) -> impl IntoResponse {
    let factory = state.orchestrator.factory();
    let active = factory.active_gateway_name().await;
    success_envelope(json!({
        "active": active,
        "gateways": factory.list_gateways(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ip_prefers_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        headers.insert("x-real-ip", "10.0.0.2".parse().unwrap());
        assert_eq!(client_ip(&headers).as_deref(), Some("203.0.113.7"));

        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "198.51.100.4".parse().unwrap());
        assert_eq!(client_ip(&headers).as_deref(), Some("198.51.100.4"));
        assert_eq!(client_ip(&HeaderMap::new()), None);
    }
}
