use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use super::store::{CacheStore, Removal};
use crate::cache::keys::{self, CACHE_ROOT, CacheKey};

/// Which part of a namespace to drop.
#[derive(Debug, Clone, PartialEq)]
pub enum ScopeParams {
    /// Every entry in the namespace.
    All,
    /// Every entry whose scope starts with these segments, e.g. all
    /// predictions of one customer.
    Segments(Vec<String>),
    /// The single entry derived from these scope segments and parameters.
    Exact { scope: Vec<String>, params: Value },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InvalidationOutcome {
    pub removed: u64,
    /// True when the store was unreachable and the delete will be replayed.
    pub deferred: bool,
}

impl From<Removal> for InvalidationOutcome {
    fn from(removal: Removal) -> Self {
        match removal {
            Removal::Removed(removed) => InvalidationOutcome {
                removed,
                deferred: false,
            },
            Removal::Deferred => InvalidationOutcome {
                removed: 0,
                deferred: true,
            },
        }
    }
}

/// Drops cached results after the data they were computed from changed.
///
/// Calls are awaited by the mutating caller. A delete that matches nothing is
/// reported as a warning only: the entry may have expired already, or a
/// concurrent recomputation may still write a stale value that then lives
/// until its TTL runs out.
#[derive(Clone)]
pub struct InvalidationCoordinator {
    cache: Arc<CacheStore>,
}

impl InvalidationCoordinator {
    pub fn new(cache: Arc<CacheStore>) -> Self {
        Self { cache }
    }

    pub async fn invalidate(&self, namespace: &str, scope: &ScopeParams) -> InvalidationOutcome {
        let (target, removal) = match scope {
            ScopeParams::All => (
                keys::namespace_prefix(namespace),
                self.cache.delete_prefix(namespace).await,
            ),
            ScopeParams::Segments(segments) => {
                let segments: Vec<&str> = segments.iter().map(String::as_str).collect();
                let prefix = keys::scope_prefix(namespace, &segments);
                let removal = self.cache.delete_rendered_prefix(&prefix).await;
                (prefix, removal)
            }
            ScopeParams::Exact { scope, params } => {
                let segments: Vec<&str> = scope.iter().map(String::as_str).collect();
                let key = CacheKey::scoped(namespace, &segments, params);
                let removal = self.cache.delete(&key).await;
                (key.to_string(), removal)
            }
        };
        self.report(&target, removal)
    }

    pub async fn invalidate_key(&self, key: &CacheKey) -> InvalidationOutcome {
        let removal = self.cache.delete(key).await;
        self.report(key.as_str(), removal)
    }

    /// Clears every cached entry. Rate-limit counters live outside the cache
    /// root and are left alone.
    pub async fn invalidate_all(&self) -> InvalidationOutcome {
        let root = format!("{}:", CACHE_ROOT);
        let removal = self.cache.delete_rendered_prefix(&root).await;
        self.report(&root, removal)
    }

    fn report(&self, target: &str, removal: Removal) -> InvalidationOutcome {
        let outcome = InvalidationOutcome::from(removal);
        if outcome.deferred {
            tracing::warn!(target_key = target, "invalidation deferred until the store is reachable");
        } else if outcome.removed == 0 {
            tracing::warn!(target_key = target, "invalidation matched no cached entries");
        } else {
            tracing::info!(target_key = target, removed = outcome.removed, "cache invalidated");
        }
        outcome
    }
}
