mod common;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header::AUTHORIZATION},
};
use jsonwebtoken::{EncodingKey, Header, encode};
use ratecache::{
    cache::CacheKey,
    limiter::CallerIdentity,
    middleware::{Claims, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING},
    router::create_router,
};
use serde_json::{Value, json};
use tower::ServiceExt;

use common::{Harness, harness};

const SECRET: &str = "integration-secret";

fn app(h: &Harness) -> Router {
    create_router(h.state.clone())
}

fn token(sub: &str, role: Option<&str>) -> String {
    let claims = Claims {
        sub: sub.to_string(),
        exp: (chrono::Utc::now().timestamp() + 600) as usize,
        role: role.map(str::to_string),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

fn request(method: &str, uri: &str, body: Option<Value>, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-real-ip", "1.2.3.4");
    if let Some(token) = bearer {
        builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_backend_state_with_limit_headers() {
    let h = harness(&[("RATE_LIMIT_QUOTAS", "health=10/minute")]);
    let response = app(&h)
        .oneshot(request("GET", "/health", None, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[&X_RATELIMIT_LIMIT], "10");
    assert_eq!(response.headers()[&X_RATELIMIT_REMAINING], "9");

    let body = json_body(response).await;
    assert_eq!(body["code"], 0);
    assert_eq!(body["content"]["status"], "ok");
    assert_eq!(body["content"]["backend"]["state"], "HEALTHY");
    assert_eq!(body["content"]["store"]["kind"], "memory");
    assert_eq!(body["content"]["store"]["reachable"], true);
}

#[tokio::test]
async fn health_shows_degraded_backend() {
    let h = harness(&[("FAILOVER_THRESHOLD", "1")]);
    h.store.set_available(false);
    let response = app(&h)
        .oneshot(request("GET", "/health", None, None))
        .await
        .unwrap();

    // the admission check itself tripped the failover
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["content"]["status"], "degraded");
    assert_eq!(body["content"]["store"]["reachable"], false);
    assert_eq!(body["content"]["local_buckets"], 1);
}

#[tokio::test]
async fn admin_quota_is_enforced() {
    let h = harness(&[("RATE_LIMIT_QUOTAS", "admin=2/minute")]);
    let app = app(&h);
    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(request("GET", "/cache/stats", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .oneshot(request("GET", "/cache/stats", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["retry-after"], "60");
    let body = json_body(response).await;
    assert_eq!(body["code"], 1005);
    assert_eq!(body["reason"], "rate_limit_exceeded");
}

#[tokio::test]
async fn invalidate_endpoint_drops_matching_entries() {
    let h = harness(&[]);
    let mine = CacheKey::scoped("prediction", &["CUST001"], &json!({"h": 1}));
    let theirs = CacheKey::scoped("prediction", &["CUST002"], &json!({"h": 1}));
    h.state.cache.put(&mine, b"a").await;
    h.state.cache.put(&theirs, b"b").await;

    let response = app(&h)
        .oneshot(request(
            "POST",
            "/cache/invalidate",
            Some(json!({"namespace": "prediction", "scope": ["CUST001"]})),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["content"]["removed"], 1);
    assert_eq!(body["content"]["deferred"], false);

    assert!(!h.state.cache.get(&mine).await.is_hit());
    assert!(h.state.cache.get(&theirs).await.is_hit());
}

#[tokio::test]
async fn invalidate_rejects_bad_namespace() {
    let h = harness(&[]);
    let response = app(&h)
        .oneshot(request(
            "POST",
            "/cache/invalidate",
            Some(json!({"namespace": "a:b"})),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn clearing_the_cache_reports_stats() {
    let h = harness(&[]);
    h.state.cache.put(&CacheKey::raw("user:1"), b"u").await;
    h.state.cache.put(&CacheKey::raw("model:info"), b"m").await;
    let app = app(&h);

    let stats = json_body(
        app.clone()
            .oneshot(request("GET", "/cache/stats", None, None))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(stats["content"]["keys_by_namespace"]["user"], 1);
    assert_eq!(stats["content"]["writes"], 2);

    let response = app
        .oneshot(request("DELETE", "/cache", None, None))
        .await
        .unwrap();
    assert_eq!(json_body(response).await["content"]["removed"], 2);
}

#[tokio::test]
async fn mutations_need_an_admin_token_when_tokens_are_verified() {
    let h = harness(&[("JWT_SECRET", SECRET)]);
    let app = app(&h);

    let user = token("alice", None);
    let response = app
        .clone()
        .oneshot(request("DELETE", "/cache", None, Some(&user)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let admin = token("root", Some("admin"));
    let response = app
        .oneshot(request("DELETE", "/cache", None, Some(&admin)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn reset_endpoint_restores_a_callers_budget() {
    let h = harness(&[("RATE_LIMIT_QUOTAS", "predict=2/minute")]);
    let caller = CallerIdentity::anonymous("ip:9.9.9.9");
    for _ in 0..2 {
        h.state.limiter.admit(&caller, "predict").await;
    }
    assert!(!h.state.limiter.admit(&caller, "predict").await.allowed);

    let response = app(&h)
        .oneshot(request(
            "POST",
            "/rate-limit/reset",
            Some(json!({"caller": "ip:9.9.9.9", "route_class": "predict"})),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(h.state.limiter.admit(&caller, "predict").await.allowed);
}

#[tokio::test]
async fn quota_endpoint_resolves_class_overrides() {
    let h = harness(&[("RATE_LIMIT_QUOTAS", "predict=30/minute,predict@admin=300/minute")]);
    let response = app(&h)
        .oneshot(request(
            "GET",
            "/rate-limit/quota?route_class=predict&caller_class=admin",
            None,
            None,
        ))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["content"]["max_requests"], 300);
    assert_eq!(body["content"]["window_seconds"], 60);
}
