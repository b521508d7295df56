mod handler;
mod model;

pub use handler::{quota, reset};
pub use model::{QuotaQuery, ResetRequest, ResetResponse};
