use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use super::counter::{LimitKey, WindowCounter, WindowVerdict};
use super::health::BackendHealth;
use super::local::LocalCounter;
use crate::clock::SharedClock;
use crate::error::BackendUnavailable;

/// Interval and backoff ceiling for the background health probe.
#[derive(Debug, Clone, Copy)]
pub struct ProbeSettings {
    pub interval: Duration,
    pub max_backoff: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Routes counting to the remote counter while it is healthy and to the
/// in-process counter while it is degraded.
///
/// A failed remote call is never retried on the request path: the request is
/// counted locally right away. While degraded every process enforces the
/// quota on its own, so a fleet of `n` processes admits up to `n` times the
/// configured quota. Counts are not carried across a switch in either
/// direction; the newly authoritative backend starts from whatever it holds.
pub struct FailoverGate {
    remote: Arc<dyn WindowCounter>,
    local: Arc<LocalCounter>,
    health: Arc<BackendHealth>,
    clock: SharedClock,
}

impl FailoverGate {
    pub fn new(
        remote: Arc<dyn WindowCounter>,
        local: Arc<LocalCounter>,
        health: Arc<BackendHealth>,
        clock: SharedClock,
    ) -> Self {
        Self {
            remote,
            local,
            health,
            clock,
        }
    }

    pub fn health(&self) -> &Arc<BackendHealth> {
        &self.health
    }

    pub fn local(&self) -> &Arc<LocalCounter> {
        &self.local
    }

    /// How the next request may use the remote counter: `None` when only the
    /// local counter may be used, `Some(true)` when it carries the single
    /// recovery attempt granted by a successful probe.
    fn remote_route(&self) -> Option<bool> {
        if self.health.is_healthy() {
            Some(false)
        } else if self.health.take_recovery_attempt() {
            Some(true)
        } else {
            None
        }
    }

    /// Counts one request. Always produces a verdict.
    pub async fn check(&self, key: &LimitKey, limit: u32, window_seconds: u64) -> WindowVerdict {
        if let Some(recovery_attempt) = self.remote_route() {
            match self.remote.check_and_increment(key, limit, window_seconds).await {
                Ok(verdict) => {
                    if self.health.record_success(recovery_attempt) {
                        tracing::info!(backend = self.remote.name(), "remote rate limit backend restored");
                    }
                    return verdict;
                }
                Err(err) => self.on_remote_failure(&err),
            }
        }
        self.local.count(key, limit, window_seconds)
    }

    fn on_remote_failure(&self, err: &BackendUnavailable) {
        if self.health.record_failure(self.clock.now()) {
            tracing::warn!(
                error = %err,
                "remote rate limit backend degraded, enforcing quotas per process"
            );
        } else {
            tracing::debug!(error = %err, "remote rate limit call failed, counted locally");
        }
    }

    /// Pings the remote once. A success while degraded arms a single
    /// optimistic retry for the next request.
    pub async fn probe_once(&self) -> bool {
        let now = self.clock.now();
        match self.remote.probe().await {
            Ok(()) => {
                self.health.arm_recovery(now);
                true
            }
            Err(err) => {
                self.health.note_probe(now);
                tracing::debug!(error = %err, "remote health probe failed");
                false
            }
        }
    }

    /// Spawns the background probe. It only pings while degraded, doubling the
    /// delay after each failed probe up to `max_backoff`.
    pub fn spawn_health_probe(self: &Arc<Self>, settings: ProbeSettings) -> JoinHandle<()> {
        let gate = Arc::clone(self);
        tokio::spawn(async move {
            let mut delay = settings.interval;
            loop {
                tokio::time::sleep(delay).await;
                if gate.health.is_healthy() {
                    delay = settings.interval;
                    continue;
                }
                delay = if gate.probe_once().await {
                    settings.interval
                } else {
                    (delay * 2).min(settings.max_backoff)
                };
            }
        })
    }
}

#[async_trait]
impl WindowCounter for FailoverGate {
    async fn check_and_increment(
        &self,
        key: &LimitKey,
        limit: u32,
        window_seconds: u64,
    ) -> Result<WindowVerdict, BackendUnavailable> {
        Ok(self.check(key, limit, window_seconds).await)
    }

    async fn reset(&self, key: &LimitKey, window_seconds: u64) -> Result<(), BackendUnavailable> {
        self.local.reset(key, window_seconds).await?;
        if self.health.is_healthy() {
            self.remote.reset(key, window_seconds).await?;
        }
        Ok(())
    }

    async fn probe(&self) -> Result<(), BackendUnavailable> {
        self.remote.probe().await
    }

    fn name(&self) -> &'static str {
        "failover"
    }
}
