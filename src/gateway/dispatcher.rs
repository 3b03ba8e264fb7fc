//! Data-plane request lifecycle
//!
//! Stages run in a fixed order and the first failure short-circuits:
//! tenant resolution, route match, authentication, rate limiting, cache
//! lookup, body collection, then origin selection and forwarding with
//! retries. Every request attributed to a tenant is recorded in analytics,
//! whatever its outcome.

use crate::domain::cache_key::CacheKeyContext;
use crate::domain::{Origin, Route, TenantId};
use crate::gateway::analytics::{AnalyticsRecorder, RequestLog};
use crate::gateway::auth::{AuthEnforcer, JwtVerifier};
use crate::gateway::balancer::{Candidate, LoadBalancer};
use crate::gateway::cache::{
    request_is_cacheable, response_is_cacheable, CacheLimits, CachedResponse, ResponseCache,
};
use crate::gateway::circuit_breaker::BreakerPolicy;
use crate::gateway::headers::{
    strip_hop_by_hop, CACHE_HIT, CACHE_MISS, CONTENT_LENGTH, CONTENT_TYPE, EVENT_STREAM, HOST,
    X_API_KEY, X_CACHE, X_FORWARDED_FOR, X_FORWARDED_HOST, X_REQUEST_ID, X_TENANT_ID,
};
use crate::gateway::matcher::CompiledRoute;
use crate::gateway::origin_state::OriginRegistry;
use crate::gateway::rate_limiter::{rate_limit_key, RateLimiterRegistry, RatePolicy};
use crate::gateway::snapshot::{GatewaySnapshot, TenantView};
use crate::gateway::types::{GatewayConfig, GatewayError, GatewayResult, RequestId};
use crate::gateway::upstream::{UpstreamClient, UrlResolver};
use crate::infrastructure::log_messages::dispatch as messages;
use crate::infrastructure::ConfigStore;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::response::Response;
use axum::BoxError;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use http::request::Parts;
use futures_util::stream::{self, StreamExt};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request};
use http_body_util::{BodyExt, BodyStream, LengthLimitError, Limited, StreamBody};
use hyper::body::{Body as HttpBody, Frame};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Runtime components shared by the data plane and the management API
#[derive(Clone)]
pub struct GatewayContext {
    pub store: Arc<ConfigStore>,
    pub jwt: Arc<JwtVerifier>,
    pub cache: Arc<ResponseCache>,
    pub rate_limiter: Arc<RateLimiterRegistry>,
    pub origins: Arc<OriginRegistry>,
    pub balancer: Arc<LoadBalancer>,
    pub analytics: Arc<AnalyticsRecorder>,
}

impl GatewayContext {
    pub fn new(
        store: Arc<ConfigStore>,
        jwt: Arc<JwtVerifier>,
        cache_limits: CacheLimits,
        breaker_policy: BreakerPolicy,
    ) -> Self {
        Self {
            store,
            jwt,
            cache: Arc::new(ResponseCache::new(cache_limits)),
            rate_limiter: Arc::new(RateLimiterRegistry::new()),
            origins: Arc::new(OriginRegistry::new(breaker_policy)),
            balancer: Arc::new(LoadBalancer::new()),
            analytics: Arc::new(AnalyticsRecorder::new()),
        }
    }
}

/// Methods that may be retried against another origin
pub fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::PUT | Method::DELETE | Method::TRACE
    )
}

/// Client address: first `X-Forwarded-For` hop, else the peer address
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> IpAddr {
    headers
        .get(X_FORWARDED_FOR)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|hop| hop.trim().parse::<IpAddr>().ok())
        .or_else(|| peer.map(|addr| addr.ip()))
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// What the request resolved to, for analytics and the access log
#[derive(Default)]
struct Outcome {
    tenant_id: Option<TenantId>,
    route: Option<Arc<Route>>,
    cache_hit: bool,
}

pub struct Dispatcher {
    config: GatewayConfig,
    context: GatewayContext,
    auth: AuthEnforcer,
    client: UpstreamClient,
}

impl Dispatcher {
    pub fn new(config: GatewayConfig, context: GatewayContext, client: UpstreamClient) -> Self {
        let auth = AuthEnforcer::new(Arc::clone(&context.jwt));
        Self {
            config,
            context,
            auth,
            client,
        }
    }

    pub fn context(&self) -> &GatewayContext {
        &self.context
    }

    /// Handle one data-plane request end to end
    pub async fn dispatch(&self, request: Request<Body>) -> Response {
        let started = Instant::now();
        let request_id = request
            .extensions()
            .get::<RequestId>()
            .copied()
            .or_else(|| RequestId::from_headers(request.headers()))
            .unwrap_or_else(RequestId::generate);
        let method = request.method().clone();
        let path = request.uri().path().to_string();
        let snapshot = self.context.store.snapshot();

        let mut outcome = Outcome::default();
        let mut response = match self
            .process(&snapshot, request, request_id, &mut outcome)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    request_id = %request_id,
                    tenant_id = ?outcome.tenant_id,
                    route_id = ?outcome.route.as_ref().map(|r| r.id),
                    method = %method,
                    path = %path,
                    error = %e,
                    "{}",
                    messages::REQUEST_REJECTED
                );
                e.into_response_for(Some(request_id))
            }
        };
        if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
            response.headers_mut().insert(X_REQUEST_ID, value);
        }

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let status = response.status().as_u16();
        if let Some(tenant_id) = outcome.tenant_id {
            let log = RequestLog {
                id: Uuid::now_v7(),
                tenant_id,
                route_id: outcome.route.as_ref().map(|r| r.id),
                method: method.to_string(),
                path: path.clone(),
                status_code: status,
                response_time_ms: elapsed_ms,
                cache_hit: outcome.cache_hit,
                created_at: Utc::now(),
            };
            self.context
                .analytics
                .record(&log, outcome.route.as_ref().map(|r| r.path_pattern.as_str()));
        }
        info!(
            request_id = %request_id,
            tenant_id = ?outcome.tenant_id,
            route_id = ?outcome.route.as_ref().map(|r| r.id),
            method = %method,
            path = %path,
            status,
            cache_hit = outcome.cache_hit,
            duration_ms = elapsed_ms,
            "{}",
            messages::REQUEST_COMPLETED
        );
        response
    }

    async fn process(
        &self,
        snapshot: &GatewaySnapshot,
        request: Request<Body>,
        request_id: RequestId,
        outcome: &mut Outcome,
    ) -> GatewayResult<Response> {
        let (parts, body) = request.into_parts();

        let view = self.resolve_tenant(snapshot, &parts.headers)?;
        let tenant_id = view.tenant.id;
        outcome.tenant_id = Some(tenant_id);
        if !view.tenant.is_serving() {
            return Err(GatewayError::TenantUnavailable(format!(
                "tenant is {:?}",
                view.tenant.status
            )));
        }

        let compiled = view
            .routes
            .find(&parts.method, parts.uri.path())
            .ok_or_else(|| GatewayError::not_found("No route matches this request"))?;
        let route = Arc::clone(&compiled.route);
        outcome.route = Some(Arc::clone(&route));

        let credentials = self
            .auth
            .authorize(route.auth_mode, tenant_id, &parts.headers, snapshot)?;

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let client_ip = client_ip(&parts.headers, peer);

        if route.rate_limit_enabled {
            let api_key = credentials.api_key.as_deref();
            let policy = RatePolicy::for_route(&route, api_key);
            let key = rate_limit_key(
                route.rate_limit_key_strategy,
                tenant_id,
                route.id,
                api_key,
                client_ip,
            );
            self.context.rate_limiter.check(route.id, policy, &key)?;
        }

        let cacheable = request_is_cacheable(&route, &parts.method, &parts.headers);
        let cache_key = cacheable.then(|| {
            compiled.cache_key.render(&CacheKeyContext {
                tenant_id,
                route_id: route.id,
                method: parts.method.as_str(),
                path: parts.uri.path(),
                query: parts.uri.query().unwrap_or_default(),
                headers: &parts.headers,
            })
        });
        if let Some(key) = &cache_key {
            if let Some(entry) = self.context.cache.get(tenant_id, key) {
                outcome.cache_hit = true;
                debug!(request_id = %request_id, cache_key = %key, "{}", messages::CACHE_HIT);
                return Ok(cached_response(&entry.response, CACHE_HIT));
            }
        }

        let body = collect_request_body(body, self.config.max_request_body_bytes).await?;
        let upstream = self
            .forward(snapshot, &parts, body, compiled, client_ip, request_id)
            .await?;

        let (mut response_parts, response_body) = upstream.into_parts();
        strip_hop_by_hop(&mut response_parts.headers);
        apply_header_rules(&mut response_parts.headers, &route.response_headers);

        let Some(key) = cache_key else {
            return Ok(Response::from_parts(response_parts, Body::new(response_body)));
        };

        response_parts
            .headers
            .insert(X_CACHE, HeaderValue::from_static(CACHE_MISS));
        let limit = self.config.max_cacheable_body_bytes;
        if !worth_buffering(&route, &response_parts, limit) {
            return Ok(Response::from_parts(response_parts, Body::new(response_body)));
        }

        match buffer_capped(response_body, limit, route.upstream_timeout()).await? {
            BufferedBody::Complete(bytes) => {
                if response_is_cacheable(
                    &route,
                    response_parts.status,
                    &response_parts.headers,
                    bytes.len(),
                    limit,
                ) {
                    let mut headers = response_parts.headers.clone();
                    headers.remove(X_CACHE);
                    self.context.cache.insert(
                        tenant_id,
                        key,
                        CachedResponse {
                            status: response_parts.status,
                            headers,
                            body: bytes.clone(),
                        },
                        Duration::from_secs(route.cache_ttl_seconds),
                    );
                }
                Ok(Response::from_parts(response_parts, Body::from(bytes)))
            }
            BufferedBody::Overflow { head, rest } => {
                debug!(request_id = %request_id, limit, "{}", messages::CACHE_SKIPPED_OVERSIZED);
                Ok(Response::from_parts(response_parts, prepend(head, rest)))
            }
        }
    }

    /// Tenant named by `<subdomain>.<base_domain>`, else by `X-Tenant-Id`
    fn resolve_tenant<'s>(
        &self,
        snapshot: &'s GatewaySnapshot,
        headers: &HeaderMap,
    ) -> GatewayResult<&'s Arc<TenantView>> {
        let from_host = headers
            .get(HOST)
            .and_then(|h| h.to_str().ok())
            .and_then(|host| subdomain_of(host, &self.config.base_domain))
            .and_then(|sub| snapshot.tenant_by_subdomain(&sub));
        if let Some(view) = from_host {
            return Ok(view);
        }

        if self.config.allow_tenant_header {
            let from_header = headers
                .get(X_TENANT_ID)
                .and_then(|h| h.to_str().ok())
                .and_then(|value| match TenantId::parse(value) {
                    Some(id) => snapshot.tenant(id),
                    None => snapshot.tenant_by_subdomain(value.trim()),
                });
            if let Some(view) = from_header {
                return Ok(view);
            }
        }

        Err(GatewayError::not_found("Unknown tenant"))
    }

    fn candidates(&self, snapshot: &GatewaySnapshot, route: &Route) -> Vec<Candidate> {
        route
            .pool()
            .into_iter()
            .filter_map(|id| snapshot.origin(id))
            .map(|origin| Candidate {
                origin: Arc::clone(origin),
                runtime: self.context.origins.runtime(origin),
            })
            .collect()
    }

    async fn forward(
        &self,
        snapshot: &GatewaySnapshot,
        parts: &Parts,
        body: Bytes,
        compiled: &CompiledRoute,
        client_ip: IpAddr,
        request_id: RequestId,
    ) -> GatewayResult<http::Response<hyper::body::Incoming>> {
        let route = &compiled.route;
        let attempts = if is_idempotent(&parts.method) {
            route.retry_attempts.saturating_add(1)
        } else {
            1
        };
        let upstream_path = compiled.rewrite_path(parts.uri.path());
        let timeout = route.upstream_timeout();
        let mut last_error = None;

        for attempt in 1..=attempts {
            let mut selection = self.context.balancer.select(
                route,
                self.candidates(snapshot, route),
                client_ip,
            )?;
            let permit = selection.permit.take();
            let request = upstream_request(
                parts,
                body.clone(),
                &selection.origin,
                &upstream_path,
                route,
                client_ip,
                request_id,
            )?;

            match self.client.send(request, timeout).await {
                Ok(response) if response.status().is_server_error() && attempt < attempts => {
                    if let Some(permit) = permit {
                        permit.failure(route.circuit_breaker_threshold);
                    }
                    warn!(
                        request_id = %request_id,
                        origin_id = %selection.origin.id,
                        status = response.status().as_u16(),
                        attempt,
                        "{}",
                        messages::RETRYING
                    );
                }
                Ok(response) => {
                    if let Some(permit) = permit {
                        if response.status().is_server_error() {
                            permit.failure(route.circuit_breaker_threshold);
                        } else {
                            permit.success();
                        }
                    }
                    return Ok(response);
                }
                Err(e) => {
                    if let Some(permit) = permit {
                        permit.failure(route.circuit_breaker_threshold);
                    }
                    warn!(
                        request_id = %request_id,
                        origin_id = %selection.origin.id,
                        attempt,
                        error = %e,
                        "{}",
                        messages::UPSTREAM_ATTEMPT_FAILED
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            GatewayError::UpstreamError("origin returned a server error".into())
        }))
    }
}

/// Whether a miss response could still end up in the cache
///
/// Event streams, uncacheable statuses and bodies declared larger than the
/// limit are forwarded as they arrive.
fn worth_buffering(route: &Route, parts: &http::response::Parts, limit: usize) -> bool {
    let event_stream = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim_start().starts_with(EVENT_STREAM));
    let declared = parts
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<usize>().ok());
    !event_stream
        && declared.is_none_or(|len| len <= limit)
        && response_is_cacheable(route, parts.status, &parts.headers, 0, limit)
}

enum BufferedBody<B> {
    Complete(Bytes),
    /// More than the limit arrived; `head` holds what was read so far
    Overflow { head: Bytes, rest: B },
}

/// Read at most `limit` bytes of `body` within `timeout`
async fn buffer_capped<B>(
    mut body: B,
    limit: usize,
    timeout: Duration,
) -> GatewayResult<BufferedBody<B>>
where
    B: HttpBody<Data = Bytes> + Unpin,
    B::Error: std::fmt::Display,
{
    let read = async {
        let mut buf = BytesMut::new();
        while let Some(frame) = body.frame().await {
            let frame = frame.map_err(|e| {
                GatewayError::UpstreamError(format!("failed to read response body: {e}"))
            })?;
            if let Ok(data) = frame.into_data() {
                buf.extend_from_slice(&data);
                if buf.len() > limit {
                    return Ok::<_, GatewayError>((buf.freeze(), false));
                }
            }
        }
        Ok((buf.freeze(), true))
    };
    let (head, complete) = tokio::time::timeout(timeout, read)
        .await
        .map_err(|_| GatewayError::UpstreamTimeout(timeout))??;

    Ok(if complete {
        BufferedBody::Complete(head)
    } else {
        BufferedBody::Overflow { head, rest: body }
    })
}

/// Replay `head`, then stream the remainder of `rest`
fn prepend<B>(head: Bytes, rest: B) -> Body
where
    B: HttpBody<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError> + Send + 'static,
{
    let first = stream::iter([Ok::<_, B::Error>(Frame::data(head))]);
    Body::new(StreamBody::new(first.chain(BodyStream::new(rest))))
}

/// Host without port, minus `.<base_domain>`, when it is a single label
fn subdomain_of(host: &str, base_domain: &str) -> Option<String> {
    let host = host.trim().to_ascii_lowercase();
    let host = match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name.to_string(),
        _ => host,
    };
    let suffix = format!(".{}", base_domain.trim_start_matches('.').to_ascii_lowercase());
    host.strip_suffix(&suffix)
        .filter(|label| !label.is_empty() && !label.contains('.'))
        .map(str::to_string)
}

async fn collect_request_body(body: Body, max_bytes: usize) -> GatewayResult<Bytes> {
    Limited::new(body, max_bytes)
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|e| {
            if e.is::<LengthLimitError>() {
                GatewayError::RequestTooLarge {
                    max_size: max_bytes,
                }
            } else {
                GatewayError::Internal(format!("failed to read request body: {e}"))
            }
        })
}

/// Set each configured header; an empty value removes it
fn apply_header_rules(headers: &mut HeaderMap, rules: &BTreeMap<String, String>) {
    for (name, value) in rules {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        if value.is_empty() {
            headers.remove(&name);
        } else if let Ok(value) = HeaderValue::from_str(value) {
            headers.insert(name, value);
        }
    }
}

fn upstream_request(
    parts: &Parts,
    body: Bytes,
    origin: &Origin,
    path: &str,
    route: &Route,
    client_ip: IpAddr,
    request_id: RequestId,
) -> GatewayResult<Request<Body>> {
    let uri = UrlResolver::resolve(origin.url.as_ref(), path, parts.uri.query())?;

    let mut headers = parts.headers.clone();
    strip_hop_by_hop(&mut headers);
    headers.remove(X_API_KEY);
    let original_host = headers.remove(HOST);

    let forwarded_for = match headers
        .get(X_FORWARDED_FOR)
        .and_then(|h| h.to_str().ok())
    {
        Some(existing) => format!("{existing}, {client_ip}"),
        None => client_ip.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        headers.insert(X_FORWARDED_FOR, value);
    }
    if let Some(host) = original_host {
        headers.insert(X_FORWARDED_HOST, host);
    }
    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        headers.insert(X_REQUEST_ID, value);
    }
    apply_header_rules(&mut headers, &route.request_headers);

    let mut request = Request::builder()
        .method(parts.method.clone())
        .uri(uri)
        .body(Body::from(body))
        .map_err(|e| GatewayError::Internal(format!("failed to build upstream request: {e}")))?;
    *request.headers_mut() = headers;
    Ok(request)
}

fn cached_response(cached: &CachedResponse, marker: &'static str) -> Response {
    let mut response = Response::new(Body::from(cached.body.clone()));
    *response.status_mut() = cached.status;
    *response.headers_mut() = cached.headers.clone();
    response
        .headers_mut()
        .insert(X_CACHE, HeaderValue::from_static(marker));
    response
}
