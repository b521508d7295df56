use std::sync::Arc;

use serde::Serialize;

use super::counter::{LimitKey, WindowCounter};
use super::failover::FailoverGate;
use super::quota::{CallerClass, CallerIdentity, Quota, QuotaTable};
use crate::clock::SharedClock;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Epoch seconds at which the current window ends.
    pub reset_at: i64,
    /// Seconds until the caller may retry. Zero when allowed.
    pub retry_after: u64,
}

/// Maps callers and route classes to quotas and asks the failover gate for a
/// verdict. Never fails: the gate always has a local path.
pub struct RateLimiter {
    gate: Arc<FailoverGate>,
    quotas: QuotaTable,
    clock: SharedClock,
    enabled: bool,
}

impl RateLimiter {
    pub fn new(gate: Arc<FailoverGate>, quotas: QuotaTable, clock: SharedClock) -> Self {
        Self {
            gate,
            quotas,
            clock,
            enabled: true,
        }
    }

    /// Turns enforcement off: every call is admitted with a full budget.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn quota(&self, route_class: &str, class: CallerClass) -> Quota {
        self.quotas.resolve(route_class, class)
    }

    pub async fn admit(&self, caller: &CallerIdentity, route_class: &str) -> Decision {
        let quota = self.quota(route_class, caller.class);
        let now = self.clock.now();

        if !self.enabled {
            return Decision {
                allowed: true,
                limit: quota.max_requests,
                remaining: quota.max_requests,
                reset_at: now + quota.window_seconds as i64,
                retry_after: 0,
            };
        }

        let key = LimitKey::new(caller.key.as_str(), route_class);
        let verdict = self
            .gate
            .check(&key, quota.max_requests, quota.window_seconds)
            .await;

        let retry_after = if verdict.allowed {
            0
        } else {
            (verdict.reset_at - now).max(0) as u64
        };
        if !verdict.allowed {
            tracing::info!(
                caller = %caller.key,
                route = route_class,
                limit = quota.max_requests,
                retry_after,
                "rate limit exceeded"
            );
        }

        Decision {
            allowed: verdict.allowed,
            limit: quota.max_requests,
            remaining: verdict.remaining,
            reset_at: verdict.reset_at,
            retry_after,
        }
    }

    /// Clears the caller's current window on every backend that can be
    /// reached. Remote failures are logged and otherwise ignored.
    pub async fn reset(&self, caller: &CallerIdentity, route_class: &str) {
        let quota = self.quota(route_class, caller.class);
        let key = LimitKey::new(caller.key.as_str(), route_class);
        if let Err(err) = self.gate.reset(&key, quota.window_seconds).await {
            tracing::warn!(error = %err, caller = %caller.key, route = route_class, "rate limit reset incomplete");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::clock::ManualClock;
    use crate::limiter::health::BackendHealth;
    use crate::limiter::local::LocalCounter;
    use crate::limiter::quota::Rate;
    use crate::limiter::remote::RemoteCounter;
    use crate::store::MemoryStore;

    fn limiter(clock: Arc<ManualClock>, store: Arc<MemoryStore>) -> RateLimiter {
        let remote = Arc::new(RemoteCounter::new(
            store,
            clock.clone(),
            Duration::from_millis(50),
            5,
        ));
        let local = Arc::new(LocalCounter::new(clock.clone(), 5, 60));
        let gate = Arc::new(FailoverGate::new(
            remote,
            local,
            Arc::new(BackendHealth::default()),
            clock.clone(),
        ));
        let quotas = QuotaTable::new("100/hour".parse().unwrap())
            .with_route("predict", Rate {
                max_requests: 3,
                window_seconds: 60,
            });
        RateLimiter::new(gate, quotas, clock)
    }

    #[tokio::test]
    async fn denial_carries_retry_after() {
        let clock = ManualClock::new(0);
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let limiter = limiter(clock.clone(), store);
        let caller = CallerIdentity::anonymous("ip:1.2.3.4");

        for t in 0..3 {
            clock.set(t);
            assert!(limiter.admit(&caller, "predict").await.allowed);
        }
        clock.set(3);
        let decision = limiter.admit(&caller, "predict").await;
        assert!(!decision.allowed);
        assert_eq!(decision.limit, 3);
        assert_eq!(decision.retry_after, 57);
        assert_eq!(decision.reset_at, 60);
    }

    #[tokio::test]
    async fn unknown_route_uses_default_quota() {
        let clock = ManualClock::new(0);
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let limiter = limiter(clock, store);
        let decision = limiter
            .admit(&CallerIdentity::anonymous("ip:1.1.1.1"), "unlisted")
            .await;
        assert_eq!(decision.limit, 100);
        assert_eq!(decision.remaining, 99);
        assert_eq!(decision.reset_at, 3600);
    }

    #[tokio::test]
    async fn disabled_limiter_admits_everything() {
        let clock = ManualClock::new(0);
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let limiter = limiter(clock, store.clone()).disabled();
        let caller = CallerIdentity::anonymous("ip:1.2.3.4");
        for _ in 0..10 {
            let decision = limiter.admit(&caller, "predict").await;
            assert!(decision.allowed);
            assert_eq!(decision.remaining, 3);
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn reset_restores_budget() {
        let clock = ManualClock::new(0);
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let limiter = limiter(clock, store);
        let caller = CallerIdentity::anonymous("ip:5.5.5.5");
        for _ in 0..4 {
            limiter.admit(&caller, "predict").await;
        }
        assert!(!limiter.admit(&caller, "predict").await.allowed);
        limiter.reset(&caller, "predict").await;
        assert_eq!(limiter.admit(&caller, "predict").await.remaining, 2);
    }

    #[tokio::test]
    async fn callers_are_counted_separately() {
        let clock = ManualClock::new(0);
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let limiter = limiter(clock, store);
        let a = CallerIdentity::anonymous("ip:1.1.1.1");
        let b = CallerIdentity::new("user:42", CallerClass::Authenticated);
        for _ in 0..3 {
            limiter.admit(&a, "predict").await;
        }
        assert!(!limiter.admit(&a, "predict").await.allowed);
        assert!(limiter.admit(&b, "predict").await.allowed);
    }
}
