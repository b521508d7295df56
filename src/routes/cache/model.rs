use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::{CacheStatsSnapshot, ScopeParams};

#[derive(Debug, Serialize)]
pub struct CacheStatsResponse {
    #[serde(flatten)]
    pub stats: CacheStatsSnapshot,
    pub pending_invalidations: usize,
}

/// `{namespace}` drops the namespace, `{namespace, scope}` one scope inside
/// it and `{namespace, scope, params}` a single derived entry.
#[derive(Debug, Deserialize)]
pub struct InvalidateRequest {
    pub namespace: String,
    #[serde(default)]
    pub scope: Vec<String>,
    pub params: Option<Value>,
}

impl InvalidateRequest {
    pub fn scope_params(&self) -> ScopeParams {
        match (&self.params, self.scope.is_empty()) {
            (Some(params), _) => ScopeParams::Exact {
                scope: self.scope.clone(),
                params: params.clone(),
            },
            (None, true) => ScopeParams::All,
            (None, false) => ScopeParams::Segments(self.scope.clone()),
        }
    }
}
