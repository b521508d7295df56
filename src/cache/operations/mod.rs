mod invalidation;
mod store;

pub use invalidation::{InvalidationCoordinator, InvalidationOutcome, ScopeParams};
pub use store::{CacheStore, Removal};
