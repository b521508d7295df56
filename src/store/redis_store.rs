use async_trait::async_trait;
use redis::{AsyncCommands, Client as RedisClient, aio::MultiplexedConnection};
use tokio::sync::Mutex;

use super::KvStore;
use crate::error::StoreError;

/// INCR plus EXPIRE-on-create, executed server side so the pair is atomic.
const INCR_WITH_EXPIRY: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return count
";

const SCAN_PAGE_SIZE: usize = 500;

/// Redis-backed store sharing one multiplexed connection across callers.
///
/// The connection is opened lazily and dropped after an I/O failure so the
/// next call reconnects.
pub struct RedisStore {
    client: RedisClient,
    conn: Mutex<Option<MultiplexedConnection>>,
    incr_script: redis::Script,
}

impl RedisStore {
    pub fn open(url: &str) -> Result<Self, StoreError> {
        let client = RedisClient::open(url)?;
        Ok(Self {
            client,
            conn: Mutex::new(None),
            incr_script: redis::Script::new(INCR_WITH_EXPIRY),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, StoreError> {
        let mut slot = self.conn.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.client.get_multiplexed_async_connection().await?;
        *slot = Some(conn.clone());
        Ok(conn)
    }

    async fn fail(&self, err: redis::RedisError) -> StoreError {
        if err.is_io_error() || err.is_connection_dropped() || err.is_timeout() {
            tracing::debug!(error = %err, "dropping redis connection");
            self.conn.lock().await.take();
        }
        StoreError::Redis(err)
    }
}

/// Escapes glob metacharacters so a key prefix can be used in `SCAN MATCH`.
fn glob_escape(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('*');
    escaped
}

#[async_trait]
impl KvStore for RedisStore {
    async fn incr_with_expiry(&self, key: &str, ttl_secs: u64) -> Result<i64, StoreError> {
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<i64> = self
            .incr_script
            .key(key)
            .arg(ttl_secs)
            .invoke_async(&mut conn)
            .await;
        match result {
            Ok(count) => Ok(count),
            Err(e) => Err(self.fail(e).await),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<Option<Vec<u8>>> = conn.get(key).await;
        match result {
            Ok(value) => Ok(value),
            Err(e) => Err(self.fail(e).await),
        }
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<()> = conn.set_ex(key, value, ttl_secs).await;
        match result {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e).await),
        }
    }

    async fn del(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<u64> = conn.del(keys).await;
        match result {
            Ok(removed) => Ok(removed),
            Err(e) => Err(self.fail(e).await),
        }
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let pattern = glob_escape(prefix);
        let mut conn = self.connection().await?;
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            // A failed page must fail the whole scan, never truncate it.
            let page: redis::RedisResult<(u64, Vec<String>)> = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_PAGE_SIZE)
                .query_async(&mut conn)
                .await;
            let (next, batch) = match page {
                Ok(page) => page,
                Err(e) => return Err(self.fail(e).await),
            };
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        // SCAN may return a key more than once.
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        match result {
            Ok(_) => Ok(()),
            Err(e) => Err(self.fail(e).await),
        }
    }

    fn kind(&self) -> &'static str {
        "redis"
    }
}
