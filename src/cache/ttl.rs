use std::collections::HashMap;

use serde::Serialize;

pub const TTL_PREDICTION: u64 = 600;
pub const TTL_USER_DATA: u64 = 300;
pub const TTL_ANALYTICS: u64 = 900;
pub const TTL_MODEL_INFO: u64 = 3600;
pub const TTL_HISTORY: u64 = 180;

/// Per-namespace time to live, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TtlPolicy {
    default_ttl: u64,
    by_namespace: HashMap<String, u64>,
}

impl TtlPolicy {
    pub fn new(default_ttl: u64) -> Self {
        Self {
            default_ttl,
            by_namespace: HashMap::new(),
        }
    }

    pub fn with(mut self, namespace: &str, ttl: u64) -> Self {
        self.by_namespace.insert(namespace.to_string(), ttl);
        self
    }

    pub fn ttl_for(&self, namespace: &str) -> u64 {
        self.by_namespace
            .get(namespace)
            .copied()
            .unwrap_or(self.default_ttl)
    }

    pub fn default_ttl(&self) -> u64 {
        self.default_ttl
    }
}

impl Default for TtlPolicy {
    /// Short lives for volatile computed results, long ones for near-static
    /// metadata.
    fn default() -> Self {
        TtlPolicy::new(TTL_USER_DATA)
            .with("prediction", TTL_PREDICTION)
            .with("user", TTL_USER_DATA)
            .with("analytics", TTL_ANALYTICS)
            .with("model", TTL_MODEL_INFO)
            .with("history", TTL_HISTORY)
    }
}
