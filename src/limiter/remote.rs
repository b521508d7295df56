use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::counter::{LimitKey, WindowCounter, WindowVerdict, window_start};
use crate::clock::SharedClock;
use crate::error::BackendUnavailable;
use crate::store::{KvStore, bounded};

/// Window counter kept in the shared key-value store, so every process
/// enforces one global quota.
pub struct RemoteCounter {
    store: Arc<dyn KvStore>,
    clock: SharedClock,
    timeout: Duration,
    grace_secs: u64,
}

impl RemoteCounter {
    pub fn new(
        store: Arc<dyn KvStore>,
        clock: SharedClock,
        timeout: Duration,
        grace_secs: u64,
    ) -> Self {
        Self {
            store,
            clock,
            timeout,
            grace_secs,
        }
    }
}

#[async_trait]
impl WindowCounter for RemoteCounter {
    async fn check_and_increment(
        &self,
        key: &LimitKey,
        limit: u32,
        window_seconds: u64,
    ) -> Result<WindowVerdict, BackendUnavailable> {
        let start = window_start(self.clock.now(), window_seconds);
        let bucket = key.bucket(start).to_string();
        let count = bounded(
            self.timeout,
            self.store
                .incr_with_expiry(&bucket, window_seconds + self.grace_secs),
        )
        .await?;

        Ok(WindowVerdict::from_count(
            count.max(0) as u64,
            limit,
            start,
            window_seconds,
        ))
    }

    async fn reset(&self, key: &LimitKey, window_seconds: u64) -> Result<(), BackendUnavailable> {
        let start = window_start(self.clock.now(), window_seconds);
        let bucket = key.bucket(start).to_string();
        bounded(self.timeout, self.store.del(&[bucket])).await?;
        Ok(())
    }

    async fn probe(&self) -> Result<(), BackendUnavailable> {
        bounded(self.timeout, self.store.ping()).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}
