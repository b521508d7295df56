use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::cache::{CacheStore, InvalidationCoordinator};
use crate::clock::SharedClock;
use crate::config::Config;
use crate::limiter::{BackendHealth, FailoverGate, LocalCounter, RateLimiter, RemoteCounter};
use crate::middleware::{IdentityResolver, RouteLimit};
use crate::store::KvStore;

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod limiter;
pub mod middleware;
pub mod result;
pub mod router;
pub mod routes;
pub mod store;
pub mod utils;

/// How often in-process buckets past their window are swept.
const LOCAL_SWEEP_SECS: u64 = 60;
/// How often deferred cache deletes are retried.
const TOMBSTONE_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub clock: SharedClock,
    pub store: Arc<dyn KvStore>,
    pub health: Arc<BackendHealth>,
    pub gate: Arc<FailoverGate>,
    pub limiter: Arc<RateLimiter>,
    pub identity: Arc<IdentityResolver>,
    pub cache: Arc<CacheStore>,
    pub invalidator: InvalidationCoordinator,
}

impl AppState {
    /// Wires the limiter and the cache around one store and one health
    /// tracker, so a store outage degrades both together.
    pub fn new(config: Config, store: Arc<dyn KvStore>, clock: SharedClock) -> Self {
        let health = Arc::new(BackendHealth::new(
            config.failover_threshold,
            config.failover_period_secs,
        ));

        let remote = Arc::new(RemoteCounter::new(
            store.clone(),
            clock.clone(),
            config.remote_timeout(),
            config.rate_limit_grace_secs,
        ));
        let local = Arc::new(LocalCounter::new(
            clock.clone(),
            config.rate_limit_grace_secs,
            LOCAL_SWEEP_SECS,
        ));
        let gate = Arc::new(FailoverGate::new(remote, local, health.clone(), clock.clone()));

        let mut limiter = RateLimiter::new(gate.clone(), config.quotas.clone(), clock.clone());
        if !config.rate_limit_enabled {
            limiter = limiter.disabled();
        }

        let cache = Arc::new(
            CacheStore::new(
                store.clone(),
                clock.clone(),
                config.remote_timeout(),
                config.cache_ttl.clone(),
            )
            .with_bulk_timeout(config.cache_bulk_timeout())
            .with_health(health.clone()),
        );

        Self {
            identity: Arc::new(IdentityResolver::new(config.jwt_secret.as_deref())),
            config: Arc::new(config),
            clock,
            store,
            health,
            gate,
            limiter: Arc::new(limiter),
            invalidator: InvalidationCoordinator::new(cache.clone()),
            cache,
        }
    }

    /// Rate limit middleware state for `route_class`.
    pub fn route_limit(&self, route_class: &str) -> RouteLimit {
        RouteLimit::new(self.limiter.clone(), self.identity.clone(), route_class)
    }

    /// Starts the health probe and the deferred-invalidation replay loop.
    pub fn spawn_background_tasks(&self) -> Vec<JoinHandle<()>> {
        let probe = self.gate.spawn_health_probe(self.config.probe_settings());

        let cache = self.cache.clone();
        let flush = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TOMBSTONE_FLUSH_INTERVAL);
            loop {
                ticker.tick().await;
                if cache.pending_invalidations() > 0 {
                    cache.flush_tombstones().await;
                }
            }
        });

        vec![probe, flush]
    }
}
