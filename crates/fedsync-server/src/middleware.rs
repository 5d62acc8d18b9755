//! Axum adapter for the signed-request gateway.

use crate::AppState;
use axum::{
    body::Body,
    http::{HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use fedsync_gateway::{
    AdmitRequest, GatewayRejection, HEADER_API_KEY, HEADER_PLATFORM_ID, HEADER_SIGNATURE,
    HEADER_TIMESTAMP,
};
use serde_json::json;
use std::sync::Arc;

/// Upper bound when buffering a body for signature verification; matches
/// the router's body limit.
const MAX_BUFFERED_BODY: usize = 2 * 1024 * 1024;

/// Runs every gateway-protected request through [`RequestGateway::admit`].
///
/// The body is buffered so the signature is verified over the exact bytes
/// received, then handed to the handler unchanged. On admission the
/// [`fedsync_gateway::Admission`] is attached as an extension and remaining
/// quota is surfaced in response headers.
///
/// [`RequestGateway::admit`]: fedsync_gateway::RequestGateway::admit
pub async fn gateway_middleware(req: Request<Body>, next: Next) -> Response {
    let Some(state) = req.extensions().get::<Arc<AppState>>().cloned() else {
        tracing::error!("gateway middleware running without AppState extension");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    let (mut parts, body) = req.into_parts();
    let body_bytes = match axum::body::to_bytes(body, MAX_BUFFERED_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("failed to buffer request body: {}", e);
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
    };

    let header = |name: &str| {
        parts
            .headers
            .get(name)
            .and_then(|value| value.to_str().ok())
    };
    let admit_request = AdmitRequest {
        path: parts.uri.path(),
        body: &body_bytes,
        platform_id: header(HEADER_PLATFORM_ID),
        api_key: header(HEADER_API_KEY),
        signature: header(HEADER_SIGNATURE),
        timestamp: header(HEADER_TIMESTAMP),
    };

    let admission = match state.gateway.admit(&admit_request) {
        Ok(admission) => admission,
        Err(rejection) => {
            tracing::warn!(
                path = admit_request.path,
                platform_id = admit_request.platform_id.unwrap_or("-"),
                "request refused: {}",
                rejection
            );
            return rejection_response(&rejection);
        }
    };

    tracing::debug!(
        platform_id = %admission.platform_id,
        path = admit_request.path,
        minute_remaining = admission.minute_remaining,
        "request admitted"
    );

    let (minute_remaining, hour_remaining) =
        (admission.minute_remaining, admission.hour_remaining);
    parts.extensions.insert(admission);
    let req = Request::from_parts(parts, Body::from(body_bytes));

    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&minute_remaining.to_string()) {
        headers.insert("x-ratelimit-remaining-minute", value);
    }
    if let Ok(value) = HeaderValue::from_str(&hour_remaining.to_string()) {
        headers.insert("x-ratelimit-remaining-hour", value);
    }
    response
}

/// Maps a rejection onto its status, reason code, and (for quota denials)
/// a `Retry-After` header.
fn rejection_response(rejection: &GatewayRejection) -> Response {
    let status = StatusCode::from_u16(rejection.http_status())
        .unwrap_or(StatusCode::UNAUTHORIZED);
    let body = Json(json!({
        "code": rejection.reason_code(),
        "message": rejection.to_string(),
    }));

    let mut response = (status, body).into_response();
    if let GatewayRejection::RateLimited { retry_after_secs } = rejection {
        if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
            response
                .headers_mut()
                .insert(axum::http::header::RETRY_AFTER, value);
        }
    }
    response
}
