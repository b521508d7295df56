mod error_handler;
mod identity;
mod rate_limit;

pub use error_handler::log_errors;
pub use identity::{Claims, IdentityResolver, client_ip};
pub use rate_limit::{
    RouteLimit, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET, rate_limit,
};
