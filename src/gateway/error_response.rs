//! Unified error response handling for both listeners
//!
//! Every error leaves the gateway as the same JSON body, with the request ID
//! in both the body and the `X-Request-Id` header when it is known.

use crate::gateway::headers::{RETRY_AFTER, X_REQUEST_ID};
use crate::gateway::types::{GatewayError, RequestId};
use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Standard error response format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Unique error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Request ID for correlation
    pub request_id: Option<String>,
    /// Additional error details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            request_id: None,
            details: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Convert to HTTP response with proper headers
    ///
    /// The body is also kept as a response extension so middleware can
    /// stamp a request id onto errors rendered without one.
    pub fn into_response_with_status(self, status: StatusCode) -> Response {
        let request_id = self.request_id.clone();
        let mut response = (status, Json(self.clone())).into_response();
        response.extensions_mut().insert(self);

        if let Some(id) = request_id {
            if let Ok(header_value) = HeaderValue::from_str(&id) {
                response.headers_mut().insert(X_REQUEST_ID, header_value);
            }
        }

        response
    }
}

/// Extension trait for consistent error formatting
pub trait ErrorResponseExt {
    /// Convert to standardized error response
    fn to_error_response(&self) -> ErrorResponse;

    /// Get the appropriate HTTP status code
    fn status_code(&self) -> StatusCode;
}

impl ErrorResponseExt for GatewayError {
    fn to_error_response(&self) -> ErrorResponse {
        use GatewayError::*;

        match self {
            NotFound(what) => ErrorResponse::new("NOT_FOUND", format!("{what} not found")),
            // Credential failures never echo the reason back to the caller
            Unauthorized(_) => ErrorResponse::new("UNAUTHORIZED", "Authentication required"),
            Forbidden(msg) => ErrorResponse::new("FORBIDDEN", msg.clone()),
            TenantUnavailable(msg) => ErrorResponse::new("TENANT_UNAVAILABLE", msg.clone()),
            RateLimited { retry_after_secs } => {
                ErrorResponse::new("RATE_LIMITED", "Too many requests").with_details(
                    serde_json::json!({ "retry_after_seconds": retry_after_secs }),
                )
            }
            ServiceUnavailable(msg) => ErrorResponse::new("SERVICE_UNAVAILABLE", msg.clone()),
            UpstreamTimeout(duration) => ErrorResponse::new(
                "UPSTREAM_TIMEOUT",
                format!("Upstream did not respond within {duration:?}"),
            ),
            UpstreamError(msg) => {
                ErrorResponse::new("UPSTREAM_ERROR", format!("Upstream error: {msg}"))
            }
            Config(msg) => ErrorResponse::new("CONFIG_ERROR", msg.clone()),
            RequestTooLarge { max_size } => ErrorResponse::new(
                "REQUEST_TOO_LARGE",
                format!("Request body exceeds {max_size} bytes"),
            ),
            Internal(_) => ErrorResponse::new("INTERNAL_ERROR", "Internal server error"),
        }
    }

    fn status_code(&self) -> StatusCode {
        use GatewayError::*;

        match self {
            NotFound(_) => StatusCode::NOT_FOUND,
            Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Forbidden(_) | TenantUnavailable(_) => StatusCode::FORBIDDEN,
            RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            UpstreamError(_) => StatusCode::BAD_GATEWAY,
            Config(_) => StatusCode::BAD_REQUEST,
            RequestTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl GatewayError {
    /// Render the error, tagging it with the request it belongs to
    pub fn into_response_for(self, request_id: Option<RequestId>) -> Response {
        let status = self.status_code();
        let mut body = self.to_error_response();
        if let Some(id) = request_id {
            body = body.with_request_id(id.to_string());
        }
        let mut response = body.into_response_with_status(status);
        if let Self::RateLimited { retry_after_secs } = self {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response
    }
}

/// Error conversion for Axum responses using standardized format
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        self.into_response_for(None)
    }
}

/// Error response for statuses produced outside a handler (e.g. body limits)
pub fn standard_error_response(status: StatusCode, request_id: Option<&str>) -> Response {
    let (code, message) = match status {
        StatusCode::BAD_REQUEST => ("BAD_REQUEST", "Invalid request"),
        StatusCode::UNAUTHORIZED => ("UNAUTHORIZED", "Authentication required"),
        StatusCode::FORBIDDEN => ("FORBIDDEN", "Access denied"),
        StatusCode::NOT_FOUND => ("NOT_FOUND", "Resource not found"),
        StatusCode::METHOD_NOT_ALLOWED => ("METHOD_NOT_ALLOWED", "Method not allowed"),
        StatusCode::PAYLOAD_TOO_LARGE => ("REQUEST_TOO_LARGE", "Request too large"),
        StatusCode::UNSUPPORTED_MEDIA_TYPE => ("UNSUPPORTED_MEDIA_TYPE", "Expected JSON body"),
        StatusCode::UNPROCESSABLE_ENTITY => ("CONFIG_ERROR", "Malformed request body"),
        StatusCode::INTERNAL_SERVER_ERROR => ("INTERNAL_ERROR", "Internal server error"),
        _ => ("ERROR", "An error occurred"),
    };

    let mut error = ErrorResponse::new(code, message);
    if let Some(id) = request_id {
        error = error.with_request_id(id);
    }

    error.into_response_with_status(status)
}
