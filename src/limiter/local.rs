use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use super::counter::{CounterState, LimitKey, WindowCounter, WindowVerdict, window_start};
use crate::clock::SharedClock;
use crate::error::BackendUnavailable;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    window_start: i64,
    window_seconds: u64,
    count: u64,
}

impl Bucket {
    fn expires_at(&self, grace_secs: u64) -> i64 {
        self.window_start + (self.window_seconds + grace_secs) as i64
    }
}

/// Single-process window counter.
///
/// Buckets live in a sharded map, so concurrent checks only contend when
/// their keys hash to the same shard.
pub struct LocalCounter {
    buckets: DashMap<LimitKey, Bucket>,
    clock: SharedClock,
    grace_secs: u64,
    sweep_interval_secs: i64,
    last_sweep: AtomicI64,
}

impl LocalCounter {
    pub fn new(clock: SharedClock, grace_secs: u64, sweep_interval_secs: u64) -> Self {
        let now = clock.now();
        Self {
            buckets: DashMap::new(),
            clock,
            grace_secs,
            sweep_interval_secs: sweep_interval_secs as i64,
            last_sweep: AtomicI64::new(now),
        }
    }

    /// Counts one request. Infallible: there is nothing remote to lose.
    pub fn count(&self, key: &LimitKey, limit: u32, window_seconds: u64) -> WindowVerdict {
        let now = self.clock.now();
        self.maybe_sweep(now);

        let start = window_start(now, window_seconds);
        let count = {
            let mut bucket = self.buckets.entry(key.clone()).or_insert(Bucket {
                window_start: start,
                window_seconds,
                count: 0,
            });
            if bucket.window_start != start || bucket.window_seconds != window_seconds {
                *bucket = Bucket {
                    window_start: start,
                    window_seconds,
                    count: 0,
                };
            }
            bucket.count += 1;
            bucket.count
        };

        WindowVerdict::from_count(count, limit, start, window_seconds)
    }

    /// Current bucket state for `key`, if one is live.
    pub fn state(&self, key: &LimitKey) -> Option<CounterState> {
        let now = self.clock.now();
        let bucket = *self.buckets.get(key)?;
        let expires_at = bucket.expires_at(self.grace_secs);
        (expires_at > now).then(|| CounterState {
            count: bucket.count,
            window_start: bucket.window_start,
            ttl_remaining: (expires_at - now) as u64,
        })
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Drops buckets whose window and grace period have both passed.
    pub fn evict_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| bucket.expires_at(self.grace_secs) > now);
        let evicted = before.saturating_sub(self.buckets.len());
        if evicted > 0 {
            tracing::debug!(evicted, "local rate limit buckets evicted");
        }
        evicted
    }

    fn maybe_sweep(&self, now: i64) {
        let last = self.last_sweep.load(Ordering::Relaxed);
        if now - last < self.sweep_interval_secs {
            return;
        }
        // Only the caller that wins the swap sweeps.
        if self
            .last_sweep
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            self.evict_expired();
        }
    }
}

#[async_trait]
impl WindowCounter for LocalCounter {
    async fn check_and_increment(
        &self,
        key: &LimitKey,
        limit: u32,
        window_seconds: u64,
    ) -> Result<WindowVerdict, BackendUnavailable> {
        Ok(self.count(key, limit, window_seconds))
    }

    async fn reset(&self, key: &LimitKey, _window_seconds: u64) -> Result<(), BackendUnavailable> {
        self.buckets.remove(key);
        Ok(())
    }

    async fn probe(&self) -> Result<(), BackendUnavailable> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::clock::ManualClock;

    fn counter_at(start: i64) -> (Arc<ManualClock>, Arc<LocalCounter>) {
        let clock = ManualClock::new(start);
        let counter = Arc::new(LocalCounter::new(clock.clone(), 5, 60));
        (clock, counter)
    }

    #[test]
    fn remaining_is_non_increasing_then_resets() {
        let (clock, counter) = counter_at(0);
        let key = LimitKey::new("ip:1.2.3.4", "predict");

        let mut last = u32::MAX;
        for t in 0..10 {
            clock.set(t);
            let v = counter.count(&key, 5, 60);
            assert!(v.remaining <= last);
            last = v.remaining;
            assert_eq!(v.allowed, t < 5);
        }

        clock.set(60);
        assert_eq!(counter.count(&key, 5, 60).remaining, 4);
    }

    #[test]
    fn state_reports_count_and_ttl() {
        let (clock, counter) = counter_at(0);
        let key = LimitKey::new("user:1", "root");
        counter.count(&key, 2, 60);
        counter.count(&key, 2, 60);
        clock.set(30);
        let state = counter.state(&key).unwrap();
        assert_eq!(state.count, 2);
        assert_eq!(state.window_start, 0);
        assert_eq!(state.ttl_remaining, 35);
    }

    #[test]
    fn sweep_evicts_finished_windows() {
        let (clock, counter) = counter_at(0);
        counter.count(&LimitKey::new("a", "r"), 1, 10);
        counter.count(&LimitKey::new("b", "r"), 1, 3600);
        clock.set(61);
        counter.count(&LimitKey::new("c", "r"), 1, 10);
        assert_eq!(counter.len(), 2);
        assert!(counter.state(&LimitKey::new("a", "r")).is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_checks_never_over_admit() {
        let (_clock, counter) = counter_at(0);
        let key = LimitKey::new("ip:10.0.0.1", "predict");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let counter = counter.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                (0..50).filter(|_| counter.count(&key, 100, 60).allowed).count()
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            admitted += handle.await.unwrap();
        }
        assert_eq!(admitted, 100);
        assert_eq!(counter.state(&key).unwrap().count, 400);
    }
}
