use serde::Serialize;

use crate::cache::CacheStatsSnapshot;
use crate::limiter::HealthSnapshot;

#[derive(Debug, Serialize)]
pub struct StoreStatus {
    pub kind: &'static str,
    pub reachable: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    /// `ok` while the shared store serves rate limits, `degraded` otherwise.
    pub status: &'static str,
    pub backend: HealthSnapshot,
    pub store: StoreStatus,
    pub rate_limiting_enabled: bool,
    pub local_buckets: usize,
    pub pending_invalidations: usize,
    pub cache: CacheStatsSnapshot,
}
