use axum::{Json, extract::State};

use super::model::{HealthReport, StoreStatus};
use crate::{
    AppState,
    result::ApiResult,
    store::bounded,
    utils::success_to_api_response,
};

pub async fn health(State(state): State<AppState>) -> Json<ApiResult<HealthReport>> {
    let reachable = bounded(state.config.remote_timeout(), state.store.ping())
        .await
        .is_ok();
    let backend = state.health.snapshot();

    success_to_api_response(HealthReport {
        status: if state.health.is_healthy() { "ok" } else { "degraded" },
        backend,
        store: StoreStatus {
            kind: state.store.kind(),
            reachable,
        },
        rate_limiting_enabled: state.limiter.is_enabled(),
        local_buckets: state.gate.local().len(),
        pending_invalidations: state.cache.pending_invalidations(),
        cache: state.cache.counters(),
    })
}
