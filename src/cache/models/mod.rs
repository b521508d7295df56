mod entry;
mod stats;

pub use entry::{CacheEntry, CacheLookup, MissReason};
pub use stats::{CacheStats, CacheStatsSnapshot};
