use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderName, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::identity::IdentityResolver;
use crate::{
    error::AppError,
    limiter::{Decision, RateLimiter},
};

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Middleware state: one instance per route class.
#[derive(Clone)]
pub struct RouteLimit {
    limiter: Arc<RateLimiter>,
    identity: Arc<IdentityResolver>,
    route_class: Arc<str>,
}

impl RouteLimit {
    pub fn new(
        limiter: Arc<RateLimiter>,
        identity: Arc<IdentityResolver>,
        route_class: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            limiter,
            identity,
            route_class: route_class.into(),
        }
    }
}

/// Counts the request against the caller's quota for the route class,
/// answering 429 once it is spent. The resolved identity is left in the
/// request extensions for handlers.
pub async fn rate_limit(
    State(route): State<RouteLimit>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0);
    let caller = route.identity.resolve(req.headers(), peer);

    let decision = route.limiter.admit(&caller, &route.route_class).await;
    let mut response = if decision.allowed {
        req.extensions_mut().insert(caller);
        next.run(req).await
    } else {
        AppError::QuotaExceeded {
            limit: decision.limit,
            retry_after: decision.retry_after,
        }
        .into_response()
    };

    insert_limit_headers(response.headers_mut(), &decision);
    response
}

fn insert_limit_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(decision.reset_at));
}
