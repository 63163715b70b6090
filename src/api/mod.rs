pub mod payments;
pub mod webhooks;

use crate::health::{HealthChecker, HealthState, HealthStatus};
use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use crate::services::cancellation::CancellationService;
use crate::services::payment_orchestrator::PaymentOrchestrator;
use crate::services::webhook_processor::WebhookProcessor;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::error;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub cancellation: Arc<CancellationService>,
    pub webhooks: Arc<WebhookProcessor>,
    pub health: HealthChecker,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/live", get(liveness))
        .route("/api/gateways", get(payments::list_gateways))
        .route("/api/payments/premium", post(payments::create_premium_payment))
        .route("/api/payments/{id}", get(payments::get_payment))
        .route("/api/payments/{id}/cancel", post(payments::cancel_payment))
        .route("/webhooks/{gateway}", post(webhooks::handle_webhook))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

async fn health(
    State(state): State<AppState>,
) -> Result<Json<HealthStatus>, (StatusCode, Json<HealthStatus>)> {
    let status = state.health.check_health().await;
    if matches!(status.status, HealthState::Unhealthy) {
        error!("Health check failed - service unhealthy");
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(status)))
    } else {
        Ok(Json(status))
    }
}

async fn liveness() -> &'static str {
    "OK"
}
