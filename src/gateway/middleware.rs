//! Middleware shared by the data plane and the management API

use crate::gateway::error_response::ErrorResponse;
use crate::gateway::headers::{CONTENT_LENGTH, X_REQUEST_ID};
use crate::gateway::types::RequestId;
use axum::{
    body::Body, extract::Request, http::HeaderValue, middleware::Next, response::Response,
};
use std::time::Instant;
use tracing::{debug, info};

/// Request ID middleware - every request carries a valid `X-Request-Id`
///
/// A well-formed UUID supplied by the caller is kept; anything else is
/// replaced. The id is also stored as a [`RequestId`] request extension.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = RequestId::from_headers(request.headers()).unwrap_or_else(RequestId::generate);
    let header = HeaderValue::from_str(&request_id.to_string()).ok();

    if let Some(value) = &header {
        request.headers_mut().insert(X_REQUEST_ID, value.clone());
    }
    request.extensions_mut().insert(request_id);

    let mut response = next.run(request).await;
    if let Some(value) = header {
        response.headers_mut().insert(X_REQUEST_ID, value);
    }
    response
}

/// Logging middleware - logs request/response details with timing
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(ToString::to_string)
        .unwrap_or_default();

    debug!(request_id = %request_id, method = %method, path = %path, "Incoming request");

    let response = next.run(request).await;

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Request completed"
    );
    response
}

/// Error handling middleware - error bodies always name the request
///
/// Handlers and extractors render [`ErrorResponse`] without knowing the
/// request id; this fills it in from the request extension.
pub async fn error_handling_middleware(request: Request, next: Next) -> Response {
    let request_id = request.extensions().get::<RequestId>().copied();
    let mut response = next.run(request).await;

    let Some(request_id) = request_id else {
        return response;
    };
    let pending = response
        .extensions()
        .get::<ErrorResponse>()
        .filter(|body| body.request_id.is_none())
        .cloned();
    if let Some(body) = pending {
        let body = body.with_request_id(request_id.to_string());
        if let Ok(bytes) = serde_json::to_vec(&body) {
            response.headers_mut().remove(CONTENT_LENGTH);
            *response.body_mut() = Body::from(bytes);
            response.extensions_mut().insert(body);
        }
    }
    response
}
