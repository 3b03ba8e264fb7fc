//! Middleware stack builder for clean composition

use crate::gateway::middleware::{
    error_handling_middleware, logging_middleware, request_id_middleware,
};
use axum::{middleware::from_fn, Router};
use tower_http::trace::TraceLayer;

/// Builder for the layers wrapped around each listener's router
#[derive(Debug, Clone, Copy, Default)]
pub struct MiddlewareStack {
    http_trace: bool,
}

impl MiddlewareStack {
    /// Request ids and access logs
    pub fn data_plane() -> Self {
        Self { http_trace: false }
    }

    /// Data-plane layers plus `tower-http` span tracing
    pub fn management() -> Self {
        Self { http_trace: true }
    }

    /// Apply the stack to a router
    ///
    /// Outer to inner: request id, trace (when enabled), access log, error
    /// bodies. The request id is assigned first so every later layer can
    /// use it.
    pub fn apply_to_router<S>(self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let router = router
            .layer(from_fn(error_handling_middleware))
            .layer(from_fn(logging_middleware));
        let router = if self.http_trace {
            router.layer(TraceLayer::new_for_http())
        } else {
            router
        };
        router.layer(from_fn(request_id_middleware))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::headers::X_REQUEST_ID;
    use axum::{body::Body, http::StatusCode, routing::get};
    use tower::ServiceExt;

    #[tokio::test]
    async fn both_stacks_tag_responses_with_request_id() {
        for stack in [MiddlewareStack::data_plane(), MiddlewareStack::management()] {
            let router = stack.apply_to_router(Router::new().route("/ok", get(|| async { "ok" })));
            let response = router
                .oneshot(
                    axum::http::Request::get("/ok")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert!(response.headers().contains_key(X_REQUEST_ID));
        }
    }
}
