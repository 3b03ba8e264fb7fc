//! Shared fixtures for the integration suites
//!
//! Routers are driven in-process with `tower::ServiceExt::oneshot`; origins
//! are real axum servers on ephemeral ports so forwarding goes over HTTP.

#![allow(dead_code)]

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use futures_util::stream;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceExt;
use vantage_edge::admin::ManagementService;
use vantage_edge::domain::{NewOrigin, NewRoute, NewTenant, Origin, OriginId, Route, TenantId};
use vantage_edge::gateway::auth::JwtVerifier;
use vantage_edge::gateway::cache::CacheLimits;
use vantage_edge::gateway::circuit_breaker::BreakerPolicy;
use vantage_edge::gateway::upstream::UpstreamClient;
use vantage_edge::gateway::{Dispatcher, GatewayConfig, GatewayContext, GatewayService};
use vantage_edge::infrastructure::ConfigStore;

pub const JWT_SECRET: &str = "integration-test-secret-0123456789abcdef";
pub const BASE_DOMAIN: &str = "gateway.test";

/// Both listeners' routers over one shared context
pub struct Harness {
    pub context: GatewayContext,
    pub gateway: Router,
    pub management: Router,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(GatewayConfig {
            base_domain: BASE_DOMAIN.to_string(),
            ..GatewayConfig::default()
        })
    }

    pub fn with_config(config: GatewayConfig) -> Self {
        let context = GatewayContext::new(
            Arc::new(ConfigStore::new()),
            Arc::new(JwtVerifier::new(JWT_SECRET, None, 0, 3600)),
            CacheLimits::default(),
            BreakerPolicy::default(),
        );
        let dispatcher = Dispatcher::new(config, context.clone(), UpstreamClient::new());
        Self {
            gateway: GatewayService::new(Arc::new(dispatcher)).into_router(),
            management: ManagementService::new(context.clone()).into_router(),
            context,
        }
    }

    pub fn create_tenant(&self, subdomain: &str) -> TenantId {
        let id = TenantId::generate();
        self.context
            .store
            .create_tenant(
                id,
                NewTenant {
                    name: format!("Tenant {subdomain}"),
                    subdomain: Some(subdomain.to_string()),
                    settings: None,
                },
            )
            .unwrap();
        id
    }

    pub fn add_origin(&self, tenant_id: TenantId, backend: &Backend, weight: u32) -> Origin {
        let new: NewOrigin = serde_json::from_value(json!({
            "name": backend.label,
            "url": backend.url(),
            "weight": weight,
        }))
        .unwrap();
        self.context.store.create_origin(tenant_id, new).unwrap()
    }

    /// Create a route from `fields` layered over a catch-all GET route
    pub fn add_route(&self, tenant_id: TenantId, origin_id: OriginId, fields: Value) -> Route {
        let mut body = json!({
            "origin_id": origin_id,
            "name": "route",
            "path_pattern": "/**",
        });
        if let (Some(base), Value::Object(extra)) = (body.as_object_mut(), fields) {
            base.extend(extra);
        }
        let new: NewRoute = serde_json::from_value(body).unwrap();
        self.context.store.create_route(tenant_id, new).unwrap()
    }

    pub fn token(&self, tenant_id: Option<TenantId>) -> String {
        self.token_with_scopes(tenant_id, &["admin"])
    }

    pub fn token_with_scopes(&self, tenant_id: Option<TenantId>, scopes: &[&str]) -> String {
        self.context
            .jwt
            .issue(
                "user-1",
                tenant_id,
                scopes.iter().map(|s| s.to_string()).collect(),
            )
            .unwrap()
    }

    pub async fn gateway(&self, request: axum::http::Request<Body>) -> Response {
        self.gateway.clone().oneshot(request).await.unwrap()
    }

    pub async fn management(&self, request: axum::http::Request<Body>) -> Response {
        self.management.clone().oneshot(request).await.unwrap()
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// GET against `<subdomain>.gateway.test`
pub fn tenant_get(subdomain: &str, path: &str) -> axum::http::request::Builder {
    axum::http::Request::get(path).header("host", format!("{subdomain}.{BASE_DOMAIN}"))
}

pub fn api(method: &str, path: &str, token: &str) -> axum::http::request::Builder {
    axum::http::Request::builder()
        .method(method)
        .uri(format!("/api/v1{path}"))
        .header("authorization", format!("Bearer {token}"))
}

pub fn json_body(value: Value) -> Body {
    Body::from(value.to_string())
}

pub async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[derive(Clone)]
struct BackendState {
    label: &'static str,
    status: StatusCode,
    hits: Arc<AtomicUsize>,
}

/// An origin server that answers every request with a JSON echo
pub struct Backend {
    pub label: &'static str,
    pub addr: SocketAddr,
    pub hits: Arc<AtomicUsize>,
}

impl Backend {
    pub async fn start(label: &'static str) -> Self {
        Self::with_status(label, StatusCode::OK).await
    }

    pub async fn with_status(label: &'static str, status: StatusCode) -> Self {
        Self::serve(label, move |hits| {
            Router::new().fallback(echo).with_state(BackendState {
                label,
                status,
                hits,
            })
        })
        .await
    }

    /// An origin that answers with `text/event-stream` and never finishes
    pub async fn event_stream(label: &'static str) -> Self {
        Self::serve(label, |hits| {
            Router::new().fallback(move || {
                hits.fetch_add(1, Ordering::SeqCst);
                async move {
                    let ticks = stream::unfold(0u64, |n| async move {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Some((Ok::<_, Infallible>(format!("data: {n}\n\n")), n + 1))
                    });
                    ([(CONTENT_TYPE, "text/event-stream")], Body::from_stream(ticks))
                }
            })
        })
        .await
    }

    /// An origin whose responses carry `size` bytes with a Content-Length
    pub async fn with_body_size(label: &'static str, size: usize) -> Self {
        Self::serve(label, move |hits| {
            Router::new().fallback(move || {
                hits.fetch_add(1, Ordering::SeqCst);
                async move { Body::from(vec![b'x'; size]) }
            })
        })
        .await
    }

    async fn serve(
        label: &'static str,
        router: impl FnOnce(Arc<AtomicUsize>) -> Router,
    ) -> Self {
        let hits = Arc::new(AtomicUsize::new(0));
        let router = router(Arc::clone(&hits));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        Self { label, addr, hits }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn echo(State(state): State<BackendState>, request: Request) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    let headers: BTreeMap<String, String> = request
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                value.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect();
    let body = json!({
        "backend": state.label,
        "method": request.method().as_str(),
        "path": request.uri().path(),
        "query": request.uri().query(),
        "headers": headers,
    });
    (state.status, Json(body)).into_response()
}
