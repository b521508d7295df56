use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A cached value as stored in the key-value store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: Vec<u8>,
    pub created_at: i64, // Unix timestamp
    pub ttl_seconds: u64,
    /// Content fingerprint, suitable as an `ETag`.
    pub version_tag: String,
}

impl CacheEntry {
    pub fn new(key: &str, value: &[u8], created_at: i64, ttl_seconds: u64) -> Self {
        let digest = Sha256::digest(value);
        Self {
            key: key.to_string(),
            value: value.to_vec(),
            created_at,
            ttl_seconds,
            version_tag: format!("{:x}", digest)[..16].to_string(),
        }
    }

    pub fn expires_at(&self) -> i64 {
        self.created_at + self.ttl_seconds as i64
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at()
    }
}

/// Why a lookup produced no value. Callers treat every variant as a miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissReason {
    Absent,
    Expired,
    Invalidated,
    Unavailable,
    Corrupt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    Hit(CacheEntry),
    Miss(MissReason),
}

impl CacheLookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit(_))
    }

    pub fn value(&self) -> Option<&[u8]> {
        match self {
            CacheLookup::Hit(entry) => Some(&entry.value),
            CacheLookup::Miss(_) => None,
        }
    }

    pub fn miss_reason(&self) -> Option<MissReason> {
        match self {
            CacheLookup::Hit(_) => None,
            CacheLookup::Miss(reason) => Some(*reason),
        }
    }
}
