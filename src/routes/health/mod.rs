mod handler;
mod model;

pub use handler::health;
pub use model::{HealthReport, StoreStatus};
