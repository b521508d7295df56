//! Key-value store abstraction shared by the remote counter and the cache.
//!
//! The production implementation is Redis; [`MemoryStore`] stands in for it in
//! tests and in single-node development when no Redis URL is configured.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

/// Operations the remote store must support.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Atomically increments `key` and returns the new value. When the
    /// increment creates the key its expiry is set to `ttl_secs`.
    async fn incr_with_expiry(&self, key: &str, ttl_secs: u64) -> Result<i64, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<(), StoreError>;

    /// Deletes the given keys, returning how many existed.
    async fn del(&self, keys: &[String]) -> Result<u64, StoreError>;

    /// Lists every live key starting with `prefix`.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Lightweight liveness check.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Short human readable name used in logs and health output.
    fn kind(&self) -> &'static str;
}

/// Runs a store call under `limit`, mapping an elapsed timer to
/// [`StoreError::Timeout`].
pub async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}
