//! End-to-end data-plane behaviour against live origin servers

mod common;

use axum::body::Body;
use axum::http::StatusCode;
use common::{body_json, tenant_get, Backend, Harness, BASE_DOMAIN};
use http_body_util::BodyExt;
use serde_json::json;
use std::time::Duration;
use vantage_edge::domain::NewApiKey;
use vantage_edge::gateway::headers::{RETRY_AFTER, X_CACHE, X_REQUEST_ID};
use vantage_edge::gateway::GatewayConfig;

#[tokio::test]
async fn highest_priority_route_wins() {
    let harness = Harness::new();
    let tenant = harness.create_tenant("acme");
    let broad = Backend::start("broad").await;
    let narrow = Backend::start("narrow").await;
    let broad_origin = harness.add_origin(tenant, &broad, 1);
    let narrow_origin = harness.add_origin(tenant, &narrow, 1);
    harness.add_route(
        tenant,
        broad_origin.id,
        json!({ "path_pattern": "/api/**", "priority": 1 }),
    );
    harness.add_route(
        tenant,
        narrow_origin.id,
        json!({ "path_pattern": "/api/users/*", "priority": 10 }),
    );

    let response = harness
        .gateway(tenant_get("acme", "/api/users/7").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["backend"], "narrow");

    let response = harness
        .gateway(tenant_get("acme", "/api/orders").body(Body::empty()).unwrap())
        .await;
    assert_eq!(body_json(response).await["backend"], "broad");
}

#[tokio::test]
async fn unknown_tenant_and_unmatched_path_are_not_found() {
    let harness = Harness::new();
    let tenant = harness.create_tenant("acme");
    let backend = Backend::start("api").await;
    let origin = harness.add_origin(tenant, &backend, 1);
    harness.add_route(tenant, origin.id, json!({ "path_pattern": "/api/*" }));

    let response = harness
        .gateway(tenant_get("nobody", "/api/x").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let request_id = response.headers()[X_REQUEST_ID].to_str().unwrap().to_string();
    let body = body_json(response).await;
    assert_eq!(body["code"], "NOT_FOUND");
    assert_eq!(body["request_id"], request_id.as_str());

    let response = harness
        .gateway(tenant_get("acme", "/other").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(backend.hits(), 0);
}

#[tokio::test]
async fn tenant_header_is_accepted_when_host_does_not_match() {
    let harness = Harness::new();
    let tenant = harness.create_tenant("acme");
    let backend = Backend::start("api").await;
    let origin = harness.add_origin(tenant, &backend, 1);
    harness.add_route(tenant, origin.id, json!({}));

    let response = harness
        .gateway(
            axum::http::Request::get("/anything")
                .header("host", "localhost:8000")
                .header("x-tenant-id", tenant.to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn suspended_tenant_is_refused() {
    let harness = Harness::new();
    let tenant = harness.create_tenant("acme");
    let backend = Backend::start("api").await;
    let origin = harness.add_origin(tenant, &backend, 1);
    harness.add_route(tenant, origin.id, json!({}));
    harness
        .context
        .store
        .update_tenant(tenant, &json!({ "status": "suspended" }))
        .unwrap();

    let response = harness
        .gateway(tenant_get("acme", "/x").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["code"], "TENANT_UNAVAILABLE");
    assert_eq!(backend.hits(), 0);
}

#[tokio::test]
async fn missing_jwt_is_rejected_before_rate_limit_and_cache() {
    let harness = Harness::new();
    let tenant = harness.create_tenant("acme");
    let backend = Backend::start("api").await;
    let origin = harness.add_origin(tenant, &backend, 1);
    harness.add_route(
        tenant,
        origin.id,
        json!({
            "auth_mode": "jwt_required",
            "rate_limit_enabled": true,
            "rate_limit_requests_per_second": 1,
            "rate_limit_burst": 2,
            "cache_enabled": true,
        }),
    );

    for _ in 0..5 {
        let response = harness
            .gateway(tenant_get("acme", "/items").body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
    assert_eq!(backend.hits(), 0);
    assert!(harness.context.cache.is_empty());

    // the unauthenticated requests consumed no rate-limit capacity
    let token = harness.token(Some(tenant));
    let authed = || {
        tenant_get("acme", "/items")
            .header("authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    };
    let first = harness.gateway(authed()).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers()[X_CACHE], "MISS");
    let second = harness.gateway(authed()).await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(second.headers()[X_CACHE], "HIT");
    let third = harness.gateway(authed()).await;
    assert_eq!(third.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(backend.hits(), 1);
}

#[tokio::test]
async fn token_for_another_tenant_is_rejected() {
    let harness = Harness::new();
    let tenant = harness.create_tenant("acme");
    let backend = Backend::start("api").await;
    let origin = harness.add_origin(tenant, &backend, 1);
    harness.add_route(tenant, origin.id, json!({ "auth_mode": "jwt_required" }));

    let foreign = harness.token(Some(vantage_edge::domain::TenantId::generate()));
    let response = harness
        .gateway(
            tenant_get("acme", "/x")
                .header("authorization", format!("Bearer {foreign}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert!(response.status().is_client_error());
    assert_eq!(backend.hits(), 0);
}

#[tokio::test]
async fn api_key_route_accepts_issued_secret() {
    let harness = Harness::new();
    let tenant = harness.create_tenant("acme");
    let backend = Backend::start("api").await;
    let origin = harness.add_origin(tenant, &backend, 1);
    harness.add_route(tenant, origin.id, json!({ "auth_mode": "apikey_required" }));
    let issued = harness
        .context
        .store
        .create_api_key(
            tenant,
            NewApiKey {
                name: "ci".into(),
                ..NewApiKey::default()
            },
        )
        .unwrap();

    let response = harness
        .gateway(
            tenant_get("acme", "/x")
                .header("x-api-key", &issued.key)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let echoed = body_json(response).await;
    assert!(echoed["headers"].get("x-api-key").is_none());

    let response = harness
        .gateway(
            tenant_get("acme", "/x")
                .header("x-api-key", "ve_live_not-a-real-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn token_bucket_admits_exactly_the_burst() {
    let harness = Harness::new();
    let tenant = harness.create_tenant("acme");
    let backend = Backend::start("api").await;
    let origin = harness.add_origin(tenant, &backend, 1);
    harness.add_route(
        tenant,
        origin.id,
        json!({
            "rate_limit_enabled": true,
            "rate_limit_requests_per_second": 1,
            "rate_limit_burst": 5,
        }),
    );

    for _ in 0..5 {
        let response = harness
            .gateway(tenant_get("acme", "/x").body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    let response = harness
        .gateway(tenant_get("acme", "/x").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(RETRY_AFTER));
    assert_eq!(body_json(response).await["code"], "RATE_LIMITED");
    assert_eq!(backend.hits(), 5);
}

#[tokio::test]
async fn cache_serves_repeat_reads_and_honours_no_cache() {
    let harness = Harness::new();
    let tenant = harness.create_tenant("acme");
    let backend = Backend::start("api").await;
    let origin = harness.add_origin(tenant, &backend, 1);
    harness.add_route(
        tenant,
        origin.id,
        json!({ "cache_enabled": true, "cache_ttl_seconds": 300 }),
    );

    let miss = harness
        .gateway(tenant_get("acme", "/items?page=1").body(Body::empty()).unwrap())
        .await;
    assert_eq!(miss.headers()[X_CACHE], "MISS");
    let miss_body = body_json(miss).await;

    let hit = harness
        .gateway(tenant_get("acme", "/items?page=1").body(Body::empty()).unwrap())
        .await;
    assert_eq!(hit.headers()[X_CACHE], "HIT");
    assert_eq!(body_json(hit).await, miss_body);
    assert_eq!(backend.hits(), 1);

    let other_query = harness
        .gateway(tenant_get("acme", "/items?page=2").body(Body::empty()).unwrap())
        .await;
    assert_eq!(other_query.headers()[X_CACHE], "MISS");

    let bypass = harness
        .gateway(
            tenant_get("acme", "/items?page=1")
                .header("cache-control", "no-cache")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert!(bypass.headers().get(X_CACHE).is_none());
    assert_eq!(backend.hits(), 3);

    let stats = harness.context.cache.stats(tenant);
    assert_eq!(stats.total_entries, 2);
    assert_eq!(stats.hits, 1);
}

#[tokio::test]
async fn cacheable_event_streams_are_forwarded_without_buffering() {
    let harness = Harness::new();
    let tenant = harness.create_tenant("acme");
    let backend = Backend::event_stream("events").await;
    let origin = harness.add_origin(tenant, &backend, 1);
    harness.add_route(
        tenant,
        origin.id,
        json!({ "cache_enabled": true, "timeout_seconds": 1 }),
    );

    let response = tokio::time::timeout(
        Duration::from_secs(5),
        harness.gateway(tenant_get("acme", "/events").body(Body::empty()).unwrap()),
    )
    .await
    .expect("headers arrive while the stream is still open");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[X_CACHE], "MISS");

    let mut body = response.into_body();
    let first = tokio::time::timeout(Duration::from_secs(5), body.frame())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(first.into_data().unwrap().starts_with(b"data: "));
    assert_eq!(harness.context.cache.stats(tenant).total_entries, 0);
}

#[tokio::test]
async fn bodies_over_the_cacheable_size_stream_through_uncached() {
    let harness = Harness::with_config(GatewayConfig {
        base_domain: BASE_DOMAIN.to_string(),
        max_cacheable_body_bytes: 1024,
        ..GatewayConfig::default()
    });
    let tenant = harness.create_tenant("acme");
    let backend = Backend::with_body_size("bulk", 256 * 1024).await;
    let origin = harness.add_origin(tenant, &backend, 1);
    harness.add_route(
        tenant,
        origin.id,
        json!({ "cache_enabled": true, "cache_ttl_seconds": 300 }),
    );

    for _ in 0..2 {
        let response = harness
            .gateway(tenant_get("acme", "/download").body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.headers()[X_CACHE], "MISS");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(bytes.len(), 256 * 1024);
    }
    assert_eq!(backend.hits(), 2);
    assert_eq!(harness.context.cache.stats(tenant).total_entries, 0);
}

#[tokio::test]
async fn weighted_round_robin_splits_three_to_one() {
    let harness = Harness::new();
    let tenant = harness.create_tenant("acme");
    let heavy = Backend::start("heavy").await;
    let light = Backend::start("light").await;
    let heavy_origin = harness.add_origin(tenant, &heavy, 3);
    let light_origin = harness.add_origin(tenant, &light, 1);
    harness.add_route(
        tenant,
        heavy_origin.id,
        json!({ "origin_pool": [heavy_origin.id, light_origin.id] }),
    );

    for _ in 0..4000 {
        let response = harness
            .gateway(tenant_get("acme", "/x").body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(heavy.hits(), 3000);
    assert_eq!(light.hits(), 1000);
}

#[tokio::test]
async fn idempotent_requests_retry_on_another_origin() {
    let harness = Harness::new();
    let tenant = harness.create_tenant("acme");
    let failing = Backend::with_status("failing", StatusCode::SERVICE_UNAVAILABLE).await;
    let healthy = Backend::start("healthy").await;
    let failing_origin = harness.add_origin(tenant, &failing, 1);
    let healthy_origin = harness.add_origin(tenant, &healthy, 1);
    harness.add_route(
        tenant,
        failing_origin.id,
        json!({
            "methods": ["GET", "POST"],
            "origin_pool": [failing_origin.id, healthy_origin.id],
            "retry_attempts": 1,
        }),
    );

    let response = harness
        .gateway(tenant_get("acme", "/x").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["backend"], "healthy");
    assert_eq!(failing.hits(), 1);

    // the rotation now points back at the failing origin; POST is not retried
    let response = harness
        .gateway(
            axum::http::Request::post("/x")
                .header("host", format!("acme.{BASE_DOMAIN}"))
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(failing.hits(), 2);
    assert_eq!(healthy.hits(), 1);
}

#[tokio::test]
async fn circuit_breaker_stops_traffic_to_a_failing_origin() {
    let harness = Harness::new();
    let tenant = harness.create_tenant("acme");
    let failing = Backend::with_status("failing", StatusCode::INTERNAL_SERVER_ERROR).await;
    let origin = harness.add_origin(tenant, &failing, 1);
    harness.add_route(
        tenant,
        origin.id,
        json!({
            "circuit_breaker_enabled": true,
            "circuit_breaker_threshold": 2,
        }),
    );

    for _ in 0..2 {
        let response = harness
            .gateway(tenant_get("acme", "/x").body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
    let response = harness
        .gateway(tenant_get("acme", "/x").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["code"], "SERVICE_UNAVAILABLE");
    assert_eq!(failing.hits(), 2);
}

#[tokio::test]
async fn unreachable_origin_is_a_bad_gateway() {
    let harness = Harness::new();
    let tenant = harness.create_tenant("acme");
    let origin = harness
        .context
        .store
        .create_origin(
            tenant,
            serde_json::from_value(json!({ "name": "gone", "url": "http://127.0.0.1:9" }))
                .unwrap(),
        )
        .unwrap();
    harness.add_route(tenant, origin.id, json!({ "timeout_seconds": 2 }));

    let response = harness
        .gateway(tenant_get("acme", "/x").body(Body::empty()).unwrap())
        .await;
    assert!(matches!(
        response.status(),
        StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT
    ));
}

#[tokio::test]
async fn forwarding_rewrites_path_and_applies_header_rules() {
    let harness = Harness::new();
    let tenant = harness.create_tenant("acme");
    let backend = Backend::start("api").await;
    let origin = harness.add_origin(tenant, &backend, 1);
    harness.add_route(
        tenant,
        origin.id,
        json!({
            "path_pattern": "/v1/**",
            "path_rewrite_pattern": "^/v1/(.*)$",
            "path_rewrite_target": "/internal/$1",
            "request_headers": { "x-injected": "yes", "x-strip-me": "" },
            "response_headers": { "x-served-by": "edge" },
        }),
    );

    let response = harness
        .gateway(
            tenant_get("acme", "/v1/users?limit=5")
                .header("x-strip-me", "secret")
                .header("x-forwarded-for", "198.51.100.7")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-served-by"], "edge");
    let request_id = response.headers()[X_REQUEST_ID].to_str().unwrap().to_string();

    let echoed = body_json(response).await;
    assert_eq!(echoed["path"], "/internal/users");
    assert_eq!(echoed["query"], "limit=5");
    let headers = &echoed["headers"];
    assert_eq!(headers["x-injected"], "yes");
    assert!(headers.get("x-strip-me").is_none());
    assert_eq!(headers["x-forwarded-host"], format!("acme.{BASE_DOMAIN}"));
    assert!(headers["x-forwarded-for"]
        .as_str()
        .unwrap()
        .starts_with("198.51.100.7"));
    assert_eq!(headers["x-request-id"], request_id.as_str());
}

#[tokio::test]
async fn oversized_request_body_is_rejected() {
    let harness = Harness::with_config(GatewayConfig {
        base_domain: BASE_DOMAIN.to_string(),
        max_request_body_bytes: 16,
        ..GatewayConfig::default()
    });
    let tenant = harness.create_tenant("acme");
    let backend = Backend::start("api").await;
    let origin = harness.add_origin(tenant, &backend, 1);
    harness.add_route(tenant, origin.id, json!({ "methods": ["POST"] }));

    let response = harness
        .gateway(
            axum::http::Request::post("/upload")
                .header("host", format!("acme.{BASE_DOMAIN}"))
                .body(Body::from(vec![b'x'; 64]))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(backend.hits(), 0);
}

#[tokio::test]
async fn requests_are_recorded_in_analytics() {
    let harness = Harness::new();
    let tenant = harness.create_tenant("acme");
    let backend = Backend::start("api").await;
    let origin = harness.add_origin(tenant, &backend, 1);
    harness.add_route(tenant, origin.id, json!({ "path_pattern": "/ok/*" }));

    for path in ["/ok/1", "/ok/2", "/missing"] {
        harness
            .gateway(tenant_get("acme", path).body(Body::empty()).unwrap())
            .await;
    }
    let report = harness.context.analytics.report(tenant);
    assert_eq!(report.total_requests, 3);
    assert_eq!(report.requests_by_status.get("200"), Some(&2));
    assert_eq!(report.requests_by_status.get("404"), Some(&1));
    assert_eq!(report.top_routes[0].path, "/ok/*");
}
