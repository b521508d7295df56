use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post},
};

use crate::{
    AppState,
    middleware::{log_errors, rate_limit},
    routes,
};

/// Operational endpoints, each group behind its own rate limit class.
pub fn create_router(state: AppState) -> Router {
    let health_routes = Router::new()
        .route("/health", get(routes::health::health))
        .route_layer(from_fn_with_state(state.route_limit("health"), rate_limit));

    let admin_routes = Router::new()
        .route("/cache/stats", get(routes::cache::stats))
        .route("/cache/invalidate", post(routes::cache::invalidate))
        .route("/cache", delete(routes::cache::clear))
        .route("/rate-limit/reset", post(routes::rate_limit::reset))
        .route("/rate-limit/quota", get(routes::rate_limit::quota))
        .route_layer(from_fn_with_state(state.route_limit("admin"), rate_limit));

    Router::new()
        .merge(health_routes)
        .merge(admin_routes)
        .layer(from_fn(log_errors))
        .with_state(state)
}
