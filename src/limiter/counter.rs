use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::BackendUnavailable;

/// Identifies a series of counting windows: one caller on one route class.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LimitKey {
    pub caller_identity: String,
    pub route_class: String,
}

impl LimitKey {
    pub fn new(caller_identity: impl Into<String>, route_class: impl Into<String>) -> Self {
        Self {
            caller_identity: caller_identity.into(),
            route_class: route_class.into(),
        }
    }

    pub fn bucket(&self, window_start: i64) -> CounterKey<'_> {
        CounterKey {
            series: self,
            window_start,
        }
    }
}

/// One fixed window bucket of a [`LimitKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterKey<'a> {
    pub series: &'a LimitKey,
    pub window_start: i64,
}

impl fmt::Display for CounterKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ratelimit:{}:{}:{}",
            self.series.route_class, self.series.caller_identity, self.window_start
        )
    }
}

/// Snapshot of one bucket after a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CounterState {
    pub count: u64,
    pub window_start: i64,
    pub ttl_remaining: u64,
}

/// Result of a single `check_and_increment`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowVerdict {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: i64,
}

impl WindowVerdict {
    /// Applies the admission rule to the post-increment count of a bucket.
    pub fn from_count(count: u64, limit: u32, window_start: i64, window_seconds: u64) -> Self {
        Self {
            allowed: count <= u64::from(limit),
            remaining: u64::from(limit).saturating_sub(count) as u32,
            reset_at: window_start + window_seconds as i64,
        }
    }
}

/// Start of the fixed bucket containing `now`. A timestamp on a boundary
/// opens the new bucket.
pub fn window_start(now: i64, window_seconds: u64) -> i64 {
    let width = window_seconds.max(1) as i64;
    now.div_euclid(width) * width
}

/// Fixed-window request counter.
#[async_trait]
pub trait WindowCounter: Send + Sync {
    /// Atomically counts one request against the current bucket of `key` and
    /// reports whether it fits within `limit`.
    async fn check_and_increment(
        &self,
        key: &LimitKey,
        limit: u32,
        window_seconds: u64,
    ) -> Result<WindowVerdict, BackendUnavailable>;

    /// Forgets the current bucket of `key`.
    async fn reset(&self, key: &LimitKey, window_seconds: u64) -> Result<(), BackendUnavailable>;

    /// Cheap liveness check of whatever the counter depends on.
    async fn probe(&self) -> Result<(), BackendUnavailable>;

    fn name(&self) -> &'static str;
}
