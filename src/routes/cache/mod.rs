mod handler;
mod model;

pub use handler::{clear, invalidate, stats};
pub use model::{CacheStatsResponse, InvalidateRequest};
