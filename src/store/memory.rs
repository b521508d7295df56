use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use super::KvStore;
use crate::clock::SharedClock;
use crate::error::StoreError;

#[derive(Debug, Clone)]
struct Slot {
    value: Vec<u8>,
    expires_at: i64,
}

/// In-process [`KvStore`] with clock-driven expiry.
///
/// It can be switched off with [`MemoryStore::set_available`] and slowed down
/// with [`MemoryStore::set_latency`] to simulate an unreachable or hung remote.
pub struct MemoryStore {
    slots: DashMap<String, Slot>,
    clock: SharedClock,
    available: AtomicBool,
    latency_ms: AtomicU64,
}

impl MemoryStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            slots: DashMap::new(),
            clock,
            available: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of live keys, ignoring availability. Test helper.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.slots.iter().filter(|s| s.expires_at > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn enter(&self) -> Result<i64, StoreError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unreachable);
        }
        Ok(self.clock.now())
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn incr_with_expiry(&self, key: &str, ttl_secs: u64) -> Result<i64, StoreError> {
        let now = self.enter().await?;
        let mut slot = self.slots.entry(key.to_string()).or_insert_with(|| Slot {
            value: Vec::new(),
            expires_at: i64::MIN,
        });
        let current = if slot.expires_at <= now {
            slot.expires_at = now + ttl_secs as i64;
            0
        } else {
            std::str::from_utf8(&slot.value)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or_else(|| StoreError::Corrupt {
                    key: key.to_string(),
                    reason: "value is not an integer".to_string(),
                })?
        };
        let next = current + 1;
        slot.value = next.to_string().into_bytes();
        Ok(next)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let now = self.enter().await?;
        Ok(self
            .slots
            .get(key)
            .filter(|slot| slot.expires_at > now)
            .map(|slot| slot.value.clone()))
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<(), StoreError> {
        let now = self.enter().await?;
        self.slots.insert(
            key.to_string(),
            Slot {
                value: value.to_vec(),
                expires_at: now + ttl_secs as i64,
            },
        );
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64, StoreError> {
        let now = self.enter().await?;
        let removed = keys
            .iter()
            .filter_map(|key| self.slots.remove(key))
            .filter(|(_, slot)| slot.expires_at > now)
            .count();
        Ok(removed as u64)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let now = self.enter().await?;
        self.slots.retain(|_, slot| slot.expires_at > now);
        Ok(self
            .slots
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.enter().await.map(|_| ())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
