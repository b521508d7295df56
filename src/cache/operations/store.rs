use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::cache::keys::{self, CACHE_ROOT, CacheKey};
use crate::cache::models::{CacheEntry, CacheLookup, CacheStats, CacheStatsSnapshot, MissReason};
use crate::cache::ttl::TtlPolicy;
use crate::clock::SharedClock;
use crate::error::StoreError;
use crate::limiter::BackendHealth;
use crate::store::{KvStore, bounded};

/// Result of a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// The store confirmed this many keys were removed.
    Removed(u64),
    /// The store could not be reached; matching entries are shadowed locally
    /// until the delete can be replayed.
    Deferred,
}

/// What a deferred delete covers: one exact key or every key under a prefix.
/// The same string can name both, so the kind is part of the identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Tombstone {
    target: String,
    exact: bool,
}

impl Tombstone {
    fn covers(&self, key: &str) -> bool {
        if self.exact {
            self.target == key
        } else {
            key.starts_with(self.target.as_str())
        }
    }
}

/// TTL-aware cache over the shared key-value store.
///
/// Store faults never escape: reads degrade to a miss, writes are dropped.
/// Deletes that cannot reach the store leave a tombstone so that an entry
/// written before the delete is never served once the store comes back.
pub struct CacheStore {
    store: Arc<dyn KvStore>,
    clock: SharedClock,
    timeout: Duration,
    bulk_timeout: Duration,
    ttl: TtlPolicy,
    health: Option<Arc<BackendHealth>>,
    /// Deferred deletes and the time they were requested.
    tombstones: DashMap<Tombstone, i64>,
    stats: CacheStats,
}

impl CacheStore {
    pub fn new(store: Arc<dyn KvStore>, clock: SharedClock, timeout: Duration, ttl: TtlPolicy) -> Self {
        Self {
            store,
            clock,
            timeout,
            bulk_timeout: timeout * 10,
            ttl,
            health: None,
            tombstones: DashMap::new(),
            stats: CacheStats::default(),
        }
    }

    /// Skips the store entirely while `health` reports it degraded.
    pub fn with_health(mut self, health: Arc<BackendHealth>) -> Self {
        self.health = Some(health);
        self
    }

    /// Limit for prefix scans and the deletes that follow them. A scan walks
    /// the whole keyspace, rate limit counters included.
    pub fn with_bulk_timeout(mut self, bulk_timeout: Duration) -> Self {
        self.bulk_timeout = bulk_timeout;
        self
    }

    fn store_usable(&self) -> bool {
        self.health.as_ref().is_none_or(|h| h.is_healthy())
    }

    pub async fn get(&self, key: &CacheKey) -> CacheLookup {
        let lookup = self.lookup(key).await;
        match &lookup {
            CacheLookup::Hit(_) => {
                tracing::debug!(key = %key, "cache hit");
                self.stats.hit();
            }
            CacheLookup::Miss(reason) => {
                tracing::debug!(key = %key, ?reason, "cache miss");
                self.stats.miss(*reason);
            }
        }
        lookup
    }

    async fn lookup(&self, key: &CacheKey) -> CacheLookup {
        if !self.store_usable() {
            return CacheLookup::Miss(MissReason::Unavailable);
        }

        let raw = match bounded(self.timeout, self.store.get(key.as_str())).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return CacheLookup::Miss(MissReason::Absent),
            Err(err) => {
                tracing::debug!(key = %key, error = %err, "cache read failed");
                return CacheLookup::Miss(MissReason::Unavailable);
            }
        };

        let entry: CacheEntry = match serde_json::from_slice(&raw) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "undecodable cache entry");
                return CacheLookup::Miss(MissReason::Corrupt);
            }
        };
        if entry.key != key.as_str() {
            return CacheLookup::Miss(MissReason::Corrupt);
        }
        if entry.is_expired(self.clock.now()) {
            return CacheLookup::Miss(MissReason::Expired);
        }
        if self.is_shadowed(key.as_str(), entry.created_at) {
            let _ = bounded(self.timeout, self.store.del(&[key.as_str().to_string()])).await;
            return CacheLookup::Miss(MissReason::Invalidated);
        }

        CacheLookup::Hit(entry)
    }

    /// Stores `value` for `ttl_seconds`. Failures are logged and dropped.
    pub async fn set(&self, key: &CacheKey, value: &[u8], ttl_seconds: u64) {
        if ttl_seconds == 0 || !self.store_usable() {
            return;
        }
        let entry = CacheEntry::new(key.as_str(), value, self.clock.now(), ttl_seconds);
        let encoded = match serde_json::to_vec(&entry) {
            Ok(encoded) => encoded,
            Err(err) => {
                tracing::error!(key = %key, error = %err, "failed to encode cache entry");
                return;
            }
        };

        let result = bounded(
            self.timeout,
            self.store.set_ex(key.as_str(), &encoded, ttl_seconds),
        )
        .await;
        if let Err(err) = &result {
            tracing::warn!(key = %key, error = %err, "cache write dropped");
        }
        self.stats.write(result.is_ok());
    }

    /// Stores `value` with the TTL configured for the key's namespace.
    pub async fn put(&self, key: &CacheKey, value: &[u8]) {
        self.set(key, value, self.ttl.ttl_for(key.namespace())).await;
    }

    /// Returns the cached value for `key`, or runs `compute`, caches its
    /// output with the namespace TTL and returns it.
    pub async fn get_or_compute<F, Fut, E>(&self, key: &CacheKey, compute: F) -> Result<Vec<u8>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>, E>>,
    {
        if let CacheLookup::Hit(entry) = self.get(key).await {
            return Ok(entry.value);
        }
        let value = compute().await?;
        self.put(key, &value).await;
        Ok(value)
    }

    pub async fn delete(&self, key: &CacheKey) -> Removal {
        self.remove(key.as_str(), true).await
    }

    /// Deletes every entry of `namespace`.
    pub async fn delete_prefix(&self, namespace: &str) -> Removal {
        self.remove(&keys::namespace_prefix(namespace), false).await
    }

    /// Deletes every entry under a rendered key prefix.
    pub async fn delete_rendered_prefix(&self, prefix: &str) -> Removal {
        self.remove(prefix, false).await
    }

    async fn remove(&self, target: &str, exact: bool) -> Removal {
        self.stats.invalidation();
        let result = if self.store_usable() {
            self.remove_remote(target, exact).await
        } else {
            Err(StoreError::Unreachable)
        };

        match result {
            Ok(removed) => Removal::Removed(removed),
            Err(err) => {
                tracing::warn!(target_key = target, error = %err, "cache delete deferred");
                self.tombstones.insert(
                    Tombstone {
                        target: target.to_string(),
                        exact,
                    },
                    self.clock.now(),
                );
                Removal::Deferred
            }
        }
    }

    async fn remove_remote(&self, target: &str, exact: bool) -> Result<u64, StoreError> {
        if exact {
            return bounded(self.timeout, self.store.del(&[target.to_string()])).await;
        }
        let keys = bounded(self.bulk_timeout, self.store.scan_prefix(target)).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        bounded(self.bulk_timeout, self.store.del(&keys)).await
    }

    fn is_shadowed(&self, key: &str, created_at: i64) -> bool {
        if self.tombstones.is_empty() {
            return false;
        }
        self.tombstones
            .iter()
            .any(|t| t.key().covers(key) && created_at <= *t.value())
    }

    /// Number of deletes still waiting to be replayed.
    pub fn pending_invalidations(&self) -> usize {
        self.tombstones.len()
    }

    /// Replays deferred deletes. A tombstone is dropped only once its delete
    /// succeeds and no newer invalidation replaced it meanwhile.
    pub async fn flush_tombstones(&self) -> usize {
        if self.tombstones.is_empty() || !self.store_usable() {
            return 0;
        }
        let pending: Vec<(Tombstone, i64)> = self
            .tombstones
            .iter()
            .map(|t| (t.key().clone(), *t.value()))
            .collect();

        let mut flushed = 0;
        for (tombstone, invalidated_at) in pending {
            match self.remove_remote(&tombstone.target, tombstone.exact).await {
                Ok(removed) => {
                    self.tombstones
                        .remove_if(&tombstone, |_, current| *current == invalidated_at);
                    tracing::info!(target_key = %tombstone.target, removed, "deferred cache delete replayed");
                    flushed += 1;
                }
                Err(err) => {
                    tracing::debug!(target_key = %tombstone.target, error = %err, "deferred cache delete still failing");
                    break;
                }
            }
        }
        flushed
    }

    /// Live key counts per namespace, from a scan of the cache root.
    pub async fn key_counts(&self) -> Option<BTreeMap<String, u64>> {
        if !self.store_usable() {
            return None;
        }
        let root = format!("{}:", CACHE_ROOT);
        let keys = bounded(self.bulk_timeout, self.store.scan_prefix(&root))
            .await
            .ok()?;
        let mut counts = BTreeMap::new();
        for key in &keys {
            if let Some(namespace) = keys::namespace_of(key) {
                *counts.entry(namespace.to_string()).or_insert(0) += 1;
            }
        }
        Some(counts)
    }

    pub async fn stats(&self) -> CacheStatsSnapshot {
        let mut snapshot = self.stats.snapshot();
        snapshot.keys_by_namespace = self.key_counts().await;
        snapshot
    }

    pub fn counters(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;

    /// Store whose prefix scan walks the whole keyspace in pages of 100 keys,
    /// paying `page_delay` per page.
    struct PagedStore {
        inner: Arc<MemoryStore>,
        page_delay: Duration,
    }

    #[async_trait]
    impl KvStore for PagedStore {
        async fn incr_with_expiry(&self, key: &str, ttl_secs: u64) -> Result<i64, StoreError> {
            self.inner.incr_with_expiry(key, ttl_secs).await
        }

        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            self.inner.get(key).await
        }

        async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<(), StoreError> {
            self.inner.set_ex(key, value, ttl_secs).await
        }

        async fn del(&self, keys: &[String]) -> Result<u64, StoreError> {
            self.inner.del(keys).await
        }

        async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
            let pages = self.inner.len() / 100 + 1;
            tokio::time::sleep(self.page_delay * pages as u32).await;
            self.inner.scan_prefix(prefix).await
        }

        async fn ping(&self) -> Result<(), StoreError> {
            self.inner.ping().await
        }

        fn kind(&self) -> &'static str {
            "paged"
        }
    }

    fn cache() -> (Arc<ManualClock>, Arc<MemoryStore>, CacheStore) {
        let clock = ManualClock::new(0);
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let cache = CacheStore::new(
            store.clone(),
            clock.clone(),
            Duration::from_millis(50),
            TtlPolicy::default(),
        );
        (clock, store, cache)
    }

    #[tokio::test]
    async fn set_then_get_is_byte_identical() {
        let (_clock, _store, cache) = cache();
        let key = CacheKey::derive("prediction", &json!({"customer": "CUST001"}));
        let value = vec![0u8, 159, 146, 150, 255, 10];
        cache.set(&key, &value, 600).await;
        assert_eq!(cache.get(&key).await.value(), Some(value.as_slice()));
    }

    #[tokio::test]
    async fn entries_expire_on_the_clock() {
        let (clock, _store, cache) = cache();
        let key = CacheKey::raw("pred:CUST001");
        cache.set(&key, b"...", 600).await;
        clock.set(599);
        assert!(cache.get(&key).await.is_hit());
        clock.set(601);
        assert_eq!(
            cache.get(&key).await,
            CacheLookup::Miss(MissReason::Absent)
        );
    }

    #[tokio::test]
    async fn unavailable_store_reads_as_miss() {
        let (_clock, store, cache) = cache();
        let key = CacheKey::raw("user:1");
        cache.set(&key, b"u", 300).await;
        store.set_available(false);
        assert_eq!(
            cache.get(&key).await.miss_reason(),
            Some(MissReason::Unavailable)
        );
        cache.set(&key, b"v", 300).await;
        assert_eq!(cache.counters().write_failures, 1);
    }

    #[tokio::test]
    async fn degraded_backend_skips_the_store() {
        let (_clock, store, cache) = cache();
        let health = Arc::new(BackendHealth::new(1, 10));
        let cache = cache.with_health(health.clone());
        let key = CacheKey::raw("user:1");
        cache.set(&key, b"u", 300).await;

        health.record_failure(0);
        store.set_latency(Duration::from_secs(5));
        let started = std::time::Instant::now();
        assert_eq!(
            cache.get(&key).await.miss_reason(),
            Some(MissReason::Unavailable)
        );
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn delete_prefix_only_touches_its_namespace() {
        let (_clock, _store, cache) = cache();
        let p1 = CacheKey::scoped("prediction", &["CUST001"], &json!({"x": 1}));
        let p2 = CacheKey::scoped("prediction", &["CUST002"], &json!({"x": 1}));
        let a = CacheKey::derive("analytics", &json!({"kind": "summary"}));
        for key in [&p1, &p2, &a] {
            cache.put(key, b"v").await;
        }

        assert_eq!(cache.delete_prefix("prediction").await, Removal::Removed(2));
        assert!(!cache.get(&p1).await.is_hit());
        assert!(!cache.get(&p2).await.is_hit());
        assert!(cache.get(&a).await.is_hit());
    }

    #[tokio::test]
    async fn deferred_delete_shadows_old_entries_until_replayed() {
        let (clock, store, cache) = cache();
        let key = CacheKey::raw("user:7");
        cache.set(&key, b"stale", 300).await;

        clock.set(10);
        store.set_available(false);
        assert_eq!(cache.delete_prefix("user").await, Removal::Deferred);
        assert_eq!(cache.pending_invalidations(), 1);

        store.set_available(true);
        assert_eq!(
            cache.get(&key).await.miss_reason(),
            Some(MissReason::Invalidated)
        );

        clock.set(11);
        cache.set(&key, b"fresh", 300).await;
        assert_eq!(cache.get(&key).await.value(), Some(&b"fresh"[..]));

        assert_eq!(cache.flush_tombstones().await, 1);
        assert_eq!(cache.pending_invalidations(), 0);
    }

    #[tokio::test]
    async fn get_or_compute_runs_once_per_ttl() {
        let (_clock, _store, cache) = cache();
        let key = CacheKey::derive("model", &json!({}));
        let calls = std::sync::atomic::AtomicU32::new(0);

        for _ in 0..3 {
            let value = cache
                .get_or_compute(&key, || async {
                    calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok::<_, std::convert::Infallible>(b"info".to_vec())
                })
                .await
                .unwrap();
            assert_eq!(value, b"info");
        }
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn compute_errors_are_not_cached() {
        let (_clock, _store, cache) = cache();
        let key = CacheKey::derive("analytics", &json!({"kind": "daily"}));
        let result = cache
            .get_or_compute(&key, || async { Err::<Vec<u8>, _>("model offline") })
            .await;
        assert_eq!(result, Err("model offline"));
        assert!(!cache.get(&key).await.is_hit());
    }

    #[tokio::test]
    async fn stats_group_keys_by_namespace() {
        let (_clock, _store, cache) = cache();
        cache.put(&CacheKey::raw("user:1"), b"a").await;
        cache.put(&CacheKey::raw("user:2"), b"b").await;
        cache.put(&CacheKey::raw("model:info"), b"c").await;
        cache.get(&CacheKey::raw("user:1")).await;
        cache.get(&CacheKey::raw("user:3")).await;

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        let counts = stats.keys_by_namespace.unwrap();
        assert_eq!(counts["user"], 2);
        assert_eq!(counts["model"], 1);
    }

    async fn crowded_paged_store(clock: &Arc<ManualClock>) -> Arc<PagedStore> {
        let inner = Arc::new(MemoryStore::new(clock.clone()));
        for caller in 0..500 {
            inner
                .incr_with_expiry(&format!("ratelimit:predict:ip:10.0.{caller}:0"), 65)
                .await
                .unwrap();
        }
        Arc::new(PagedStore {
            inner,
            page_delay: Duration::from_millis(20),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn prefix_delete_on_a_large_keyspace_uses_the_bulk_timeout() {
        let clock = ManualClock::new(0);
        let store = crowded_paged_store(&clock).await;
        let cache = CacheStore::new(
            store.clone(),
            clock.clone(),
            Duration::from_millis(50),
            TtlPolicy::default(),
        )
        .with_bulk_timeout(Duration::from_secs(2));

        let key = CacheKey::scoped("prediction", &["CUST001"], &json!({"h": 1}));
        cache.put(&key, b"v").await;

        assert_eq!(cache.delete_prefix("prediction").await, Removal::Removed(1));
        assert_eq!(cache.pending_invalidations(), 0);
        assert!(!cache.get(&key).await.is_hit());
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_prefix_delete_drains_on_a_large_keyspace() {
        let clock = ManualClock::new(0);
        let store = crowded_paged_store(&clock).await;
        let cache = CacheStore::new(
            store.clone(),
            clock.clone(),
            Duration::from_millis(50),
            TtlPolicy::default(),
        );
        cache.put(&CacheKey::raw("user:1"), b"u").await;

        // 6 pages of 20ms outlive a single-call timeout but not a bulk one
        let strict = CacheStore::new(
            store.clone(),
            clock.clone(),
            Duration::from_millis(50),
            TtlPolicy::default(),
        )
        .with_bulk_timeout(Duration::from_millis(50));
        assert_eq!(strict.delete_prefix("user").await, Removal::Deferred);
        assert_eq!(strict.flush_tombstones().await, 0);

        assert_eq!(cache.delete_prefix("user").await, Removal::Removed(1));
        clock.set(1);
        store.inner.set_available(false);
        assert_eq!(cache.delete_prefix("user").await, Removal::Deferred);
        store.inner.set_available(true);
        assert_eq!(cache.flush_tombstones().await, 1);
        assert_eq!(cache.pending_invalidations(), 0);
    }

    #[tokio::test]
    async fn exact_and_prefix_tombstones_on_the_same_string_coexist() {
        let (clock, store, cache) = cache();
        let member = CacheKey::raw("user:7");
        let bare = CacheKey::raw("user:");
        cache.set(&member, b"stale", 300).await;
        cache.set(&bare, b"stale", 300).await;
        assert_eq!(bare.as_str(), keys::namespace_prefix("user"));

        clock.set(10);
        store.set_available(false);
        assert_eq!(cache.delete_prefix("user").await, Removal::Deferred);
        assert_eq!(cache.delete(&bare).await, Removal::Deferred);
        assert_eq!(cache.pending_invalidations(), 2);

        store.set_available(true);
        assert_eq!(
            cache.get(&member).await.miss_reason(),
            Some(MissReason::Invalidated)
        );
    }
}
