use axum::{
    Json,
    extract::{Extension, State},
};

use super::model::{CacheStatsResponse, InvalidateRequest};
use crate::{
    AppState,
    cache::InvalidationOutcome,
    error::AppError,
    limiter::CallerIdentity,
    result::ApiResult,
    routes::require_admin,
    utils::success_to_api_response,
};

pub async fn stats(State(state): State<AppState>) -> Json<ApiResult<CacheStatsResponse>> {
    success_to_api_response(CacheStatsResponse {
        stats: state.cache.stats().await,
        pending_invalidations: state.cache.pending_invalidations(),
    })
}

pub async fn invalidate(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Json(req): Json<InvalidateRequest>,
) -> Result<Json<ApiResult<InvalidationOutcome>>, AppError> {
    require_admin(&state, &caller)?;
    if req.namespace.trim().is_empty() || req.namespace.contains(':') {
        return Err(AppError::BadRequest(
            "namespace must be a non-empty name without ':'".to_string(),
        ));
    }

    let outcome = state
        .invalidator
        .invalidate(&req.namespace, &req.scope_params())
        .await;
    Ok(success_to_api_response(outcome))
}

pub async fn clear(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
) -> Result<Json<ApiResult<InvalidationOutcome>>, AppError> {
    require_admin(&state, &caller)?;
    Ok(success_to_api_response(state.invalidator.invalidate_all().await))
}
