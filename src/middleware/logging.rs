use crate::middleware::error::request_id;
use axum::{extract::Request, middleware::Next, response::Response};
use http::HeaderValue;
use std::time::Instant;
use tower_http::request_id::{MakeRequestId, RequestId};
use tracing::Instrument;
use uuid::Uuid;

/// `x-request-id` generator for [`tower_http::request_id::SetRequestIdLayer`].
#[derive(Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &http::Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Logs each request/response pair inside a span carrying the request id.
pub async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let request_id = request_id(request.headers()).unwrap_or_else(|| "-".to_string());
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let span = tracing::info_span!(
        "http_request",
        request_id = %request_id,
        method = %method,
        path = %path,
    );

    async move {
        tracing::info!("Incoming request");
        let response = next.run(request).await;
        let status = response.status();
        let latency_ms = start.elapsed().as_millis();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), latency_ms, "Outgoing response");
        } else {
            tracing::info!(status = status.as_u16(), latency_ms, "Outgoing response");
        }
        response
    }
    .instrument(span)
    .await
}
