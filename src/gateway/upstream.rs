//! Upstream HTTP client and target URI resolution

use crate::gateway::headers::paths;
use crate::gateway::types::{GatewayError, GatewayResult};
use axum::body::Body;
use hyper::body::Incoming;
use hyper::{Request, Response, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;

pub type HttpClient = Client<HttpConnector, Body>;

/// Shared client used for forwarding and health probes
#[derive(Clone)]
pub struct UpstreamClient {
    client: HttpClient,
}

impl Default for UpstreamClient {
    fn default() -> Self {
        Self::new()
    }
}

impl UpstreamClient {
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new())
            .http1_title_case_headers(true)
            .http1_preserve_header_case(true)
            .pool_idle_timeout(Duration::from_secs(90))
            .build_http();
        Self { client }
    }

    /// Send a request, failing with `UpstreamTimeout` after `timeout`
    pub async fn send(
        &self,
        request: Request<Body>,
        timeout: Duration,
    ) -> GatewayResult<Response<Incoming>> {
        tokio::time::timeout(timeout, self.client.request(request))
            .await
            .map_err(|_| GatewayError::UpstreamTimeout(timeout))?
            .map_err(|e| GatewayError::UpstreamError(format!("connection error: {e}")))
    }
}

/// Builds upstream URIs from an origin base URL and the request path
pub struct UrlResolver;

impl UrlResolver {
    /// `base` may carry a path prefix; `path` is appended to it
    pub fn resolve(base: &str, path: &str, query: Option<&str>) -> GatewayResult<Uri> {
        let base = base.trim_end_matches('/');
        let path = if path.is_empty() { paths::DEFAULT } else { path };
        let uri = match query.filter(|q| !q.is_empty()) {
            Some(query) => format!("{base}{path}?{query}"),
            None => format!("{base}{path}"),
        };
        uri.parse()
            .map_err(|_| GatewayError::UpstreamError(format!("invalid upstream URI: {uri}")))
    }
}
