use axum::{
    Json,
    extract::{Extension, Query, State},
};

use super::model::{QuotaQuery, ResetRequest, ResetResponse};
use crate::{
    AppState,
    error::AppError,
    limiter::{CallerClass, CallerIdentity, Quota},
    result::ApiResult,
    routes::require_admin,
    utils::success_to_api_response,
};

pub async fn reset(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Json(req): Json<ResetRequest>,
) -> Result<Json<ApiResult<ResetResponse>>, AppError> {
    require_admin(&state, &caller)?;
    if req.caller.trim().is_empty() || req.route_class.trim().is_empty() {
        return Err(AppError::BadRequest(
            "caller and route_class are required".to_string(),
        ));
    }

    let target = CallerIdentity::new(
        req.caller.trim(),
        req.caller_class.unwrap_or(CallerClass::Anonymous),
    );
    state.limiter.reset(&target, req.route_class.trim()).await;
    tracing::info!(admin = %caller.key, target = %target.key, route = %req.route_class, "rate limit reset");

    Ok(success_to_api_response(ResetResponse {
        caller: target.key,
        route_class: req.route_class.trim().to_string(),
    }))
}

pub async fn quota(
    State(state): State<AppState>,
    Query(query): Query<QuotaQuery>,
) -> Json<ApiResult<Quota>> {
    let class = query.caller_class.unwrap_or(CallerClass::Anonymous);
    success_to_api_response(state.limiter.quota(&query.route_class, class))
}
