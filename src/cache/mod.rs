//! Response cache over the shared key-value store.

pub mod keys;
pub mod models;
pub mod operations;
pub mod ttl;

pub use keys::CacheKey;
pub use models::{CacheEntry, CacheLookup, CacheStatsSnapshot, MissReason};
pub use operations::{CacheStore, InvalidationCoordinator, InvalidationOutcome, Removal, ScopeParams};
pub use ttl::TtlPolicy;
