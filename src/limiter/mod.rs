//! Fixed-window rate limiting with remote/local failover.
//!
//! Requests are counted in buckets of `window_seconds`. A caller may burst up
//! to twice its limit across a bucket boundary; this is accepted in exchange
//! for one atomic increment per check.

mod counter;
mod failover;
mod health;
mod local;
mod policy;
mod quota;
mod remote;

pub use counter::{CounterKey, CounterState, LimitKey, WindowCounter, WindowVerdict, window_start};
pub use failover::{FailoverGate, ProbeSettings};
pub use health::{BackendHealth, HealthSnapshot, HealthState};
pub use local::LocalCounter;
pub use policy::{Decision, RateLimiter};
pub use quota::{CallerClass, CallerIdentity, Quota, QuotaTable, Rate};
pub use remote::RemoteCounter;
